//! Group specifiers and the agreement-gated membership index.

use crate::directory::{DirectorySnapshot, Uid};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix marking a group-type selector rather than a literal group name.
pub const GROUP_TYPE_PREFIX: char = '@';

/// Group-type selector matching every agreement-holder with at least one membership.
pub const ALL_SELECTOR: &str = "all";

/// A parsed group specifier from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSpec<'a> {
    /// `@all`
    AllAgreed,
    /// `@<type>`
    Type(&'a str),
    /// A literal group name.
    Named(&'a str),
}

impl<'a> GroupSpec<'a> {
    #[must_use]
    pub fn parse(spec: &'a str) -> Self {
        match spec.strip_prefix(GROUP_TYPE_PREFIX) {
            Some(ALL_SELECTOR) => Self::AllAgreed,
            Some(group_type) => Self::Type(group_type),
            None => Self::Named(spec),
        }
    }

    #[must_use]
    pub fn is_selector(self) -> bool {
        !matches!(self, Self::Named(_))
    }
}

/// Groups reserved for contributor agreements.
///
/// These carry agreement signatures, not access grants, so they never count
/// toward a group type or toward the "member of some group" half of `@all`.
#[derive(Debug, Clone)]
pub struct AgreementRule<'a> {
    pub group: &'a str,
    pub reserved_prefix: &'a str,
}

impl AgreementRule<'_> {
    #[must_use]
    pub fn is_agreement_group(&self, name: &str) -> bool {
        name == self.group || (!self.reserved_prefix.is_empty() && name.starts_with(self.reserved_prefix))
    }
}

/// Membership aggregated by group type, plus the agreement-gated `@all` set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipIndex {
    by_type: BTreeMap<String, BTreeSet<Uid>>,
    agreed: BTreeSet<Uid>,
}

impl MembershipIndex {
    /// Build the index. Returns `None` when the agreement group does not exist.
    #[must_use]
    pub fn build(snapshot: &DirectorySnapshot, rule: &AgreementRule<'_>) -> Option<Self> {
        let signers = snapshot.group(rule.group)?.members();

        let mut by_type: BTreeMap<String, BTreeSet<Uid>> = BTreeMap::new();
        for group in snapshot.groups().filter(|g| !rule.is_agreement_group(&g.name)) {
            by_type
                .entry(group.group_type.clone())
                .or_default()
                .extend(group.members());
        }

        let in_any_group: BTreeSet<Uid> = by_type.values().flatten().copied().collect();
        let agreed = signers
            .into_iter()
            .filter(|uid| in_any_group.contains(uid) && snapshot.user(*uid).is_some())
            .collect();

        Some(Self { by_type, agreed })
    }

    /// Uids of every user in a group of the given type.
    #[must_use]
    pub fn of_type(&self, group_type: &str) -> Option<&BTreeSet<Uid>> {
        self.by_type.get(group_type)
    }

    /// Active agreement signers that belong to at least one other group.
    #[must_use]
    pub fn agreed(&self) -> &BTreeSet<Uid> {
        &self.agreed
    }
}
