//! Membership resolution: which remote users get a local account, and how.

mod selectors;

pub use selectors::{AgreementRule, GroupSpec, MembershipIndex, ALL_SELECTOR, GROUP_TYPE_PREFIX};

use crate::config::SyncConfig;
use crate::directory::{DirectorySnapshot, Uid};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No such group: {0}")]
    AgreementGroupMissing(String),
}

/// Access tier of a provisioned account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Restricted,
    Full,
}

/// The decision to provision one remote identity locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub uid: Uid,
    pub shell: String,
    /// Forced command for authorized_keys entries; empty for none.
    pub ssh_command: String,
    /// Extra authorized_keys options; empty for none.
    pub ssh_options: String,
    pub privilege: Privilege,
}

/// Resolved accounts keyed by uid.
pub type ResolvedAccounts = BTreeMap<Uid, ResolvedAccount>;

/// Shell and SSH settings applied to each privilege tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPolicy {
    pub default_shell: String,
    pub restricted_shell: String,
    pub admin_ssh_command: Option<String>,
    pub admin_ssh_options: Option<String>,
    pub restricted_ssh_command: String,
    pub restricted_ssh_options: String,
}

impl AccountPolicy {
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        let users = &config.users;
        Self {
            default_shell: users.default_shell.clone(),
            restricted_shell: users.restricted_shell.clone(),
            admin_ssh_command: users.admin_ssh_command.clone(),
            admin_ssh_options: users.admin_ssh_options.clone(),
            restricted_ssh_command: users.restricted_ssh_command.clone(),
            restricted_ssh_options: users.restricted_ssh_options.clone(),
        }
    }

    fn full(&self, uid: Uid) -> ResolvedAccount {
        ResolvedAccount {
            uid,
            shell: self.default_shell.clone(),
            ssh_command: self.admin_ssh_command.clone().unwrap_or_default(),
            ssh_options: self.admin_ssh_options.clone().unwrap_or_default(),
            privilege: Privilege::Full,
        }
    }

    fn restricted(&self, uid: Uid) -> ResolvedAccount {
        ResolvedAccount {
            uid,
            shell: self.restricted_shell.clone(),
            ssh_command: self.restricted_ssh_command.clone(),
            ssh_options: self.restricted_ssh_options.clone(),
            privilege: Privilege::Restricted,
        }
    }
}

/// Compute the set of local accounts to provision.
///
/// A specifier listed under `restricted` only grants restricted access when
/// it is absent from `valid`. Full access always overrides restricted access
/// regardless of order; among restricted grants the first one is kept.
pub fn resolve(
    valid: &[String],
    restricted: &[String],
    snapshot: &DirectorySnapshot,
    rule: &AgreementRule<'_>,
    policy: &AccountPolicy,
) -> Result<ResolvedAccounts, ResolveError> {
    let specs: Vec<&str> = valid
        .iter()
        .chain(restricted)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let valid_set: BTreeSet<&str> = valid.iter().map(|s| s.trim()).collect();

    let index = if specs.iter().any(|s| GroupSpec::parse(s).is_selector()) {
        Some(
            MembershipIndex::build(snapshot, rule)
                .ok_or_else(|| ResolveError::AgreementGroupMissing(rule.group.to_string()))?,
        )
    } else {
        None
    };

    let mut accounts = ResolvedAccounts::new();
    for spec in specs {
        let Some(uids) = expand(spec, snapshot, index.as_ref()) else {
            continue;
        };
        let is_restricted = !valid_set.contains(spec);

        for uid in uids {
            if snapshot.user(uid).is_none() {
                // Deactivated upstream.
                continue;
            }
            if is_restricted {
                accounts.entry(uid).or_insert_with(|| policy.restricted(uid));
            } else {
                accounts.insert(uid, policy.full(uid));
            }
        }
    }

    debug!(accounts = accounts.len(), "Resolved local accounts");
    Ok(accounts)
}

fn expand(
    spec: &str,
    snapshot: &DirectorySnapshot,
    index: Option<&MembershipIndex>,
) -> Option<BTreeSet<Uid>> {
    match (GroupSpec::parse(spec), index) {
        (GroupSpec::AllAgreed, Some(index)) => Some(index.agreed().clone()),
        (GroupSpec::Type(group_type), Some(index)) => {
            let uids = index.of_type(group_type).cloned();
            if uids.is_none() {
                warn!(group_type, "No such group type; skipping");
            }
            uids
        }
        (GroupSpec::Named(name), _) => {
            let members = snapshot.group(name).map(crate::directory::RemoteGroup::members);
            if members.is_none() {
                warn!(group = name, "No such group; skipping");
            }
            members
        }
        (_, None) => None,
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
