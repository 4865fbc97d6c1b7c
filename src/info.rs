//! Details about remote users and groups, and what this host carries.

use crate::authconfig::{local_database_enabled, AuthConfigError};
use crate::config::SyncConfig;
use crate::directory::DirectorySnapshot;
use crate::resolver::GroupSpec;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfoError {
    #[error("No such user: {0}")]
    NoSuchUser(String),

    #[error("No such group: {0}")]
    NoSuchGroup(String),

    #[error("Auth configuration error: {0}")]
    Auth(#[from] AuthConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub human_name: String,
    pub status: String,
    pub memberships: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub group_type: String,
    pub members: usize,
    /// `None` when the group is not configured for this host.
    pub synchronized: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub local_database_enabled: bool,
    pub synchronized: Vec<String>,
    pub unsynchronized: Vec<String>,
}

pub fn user_info(snapshot: &DirectorySnapshot, username: &str) -> Result<UserInfo, InfoError> {
    let user = snapshot
        .user_by_name(username)
        .ok_or_else(|| InfoError::NoSuchUser(username.to_string()))?;
    Ok(UserInfo {
        username: user.username.clone(),
        human_name: user.human_name.clone(),
        status: user.status.as_str().to_string(),
        memberships: snapshot
            .memberships(user.id)
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

pub fn group_info(
    snapshot: &DirectorySnapshot,
    config: &SyncConfig,
    name: &str,
    group_exists: impl Fn(&str) -> bool,
) -> Result<GroupInfo, InfoError> {
    let group = snapshot
        .group(name)
        .ok_or_else(|| InfoError::NoSuchGroup(name.to_string()))?;
    let configured = configured_groups(config).any(|g| g == group.name);
    Ok(GroupInfo {
        name: group.name.clone(),
        group_type: group.group_type.clone(),
        members: group.members().len(),
        synchronized: configured.then(|| group_exists(&group.name)),
    })
}

/// Whether local accounts are on, and which configured groups resolve locally.
pub async fn host_status(
    config: &SyncConfig,
    prefix: &Path,
    group_exists: impl Fn(&str) -> bool,
) -> Result<HostStatus, InfoError> {
    let enabled = local_database_enabled(&config.auth, prefix).await?;
    let (synchronized, unsynchronized) = configured_groups(config)
        .map(str::to_string)
        .partition(|g| group_exists(g));
    Ok(HostStatus {
        local_database_enabled: enabled,
        synchronized,
        unsynchronized,
    })
}

/// Literal group names configured for this host; selectors are left out.
fn configured_groups(config: &SyncConfig) -> impl Iterator<Item = &str> {
    config
        .all_group_specs()
        .into_iter()
        .filter_map(|spec| match GroupSpec::parse(spec) {
            GroupSpec::Named(name) => Some(name),
            GroupSpec::AllAgreed | GroupSpec::Type(_) => None,
        })
}

/// Whether the name service knows a group by this name.
#[must_use]
pub fn system_group_exists(name: &str) -> bool {
    matches!(nix::unistd::Group::from_name(name), Ok(Some(_)))
}

impl fmt::Display for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "username:    {}", self.username)?;
        writeln!(f, "fullname:    {}", self.human_name)?;
        writeln!(f, "status:      {}", self.status)?;
        write!(f, "memberships: {}", self.memberships.join(", "))
    }
}

impl fmt::Display for GroupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name:         {}", self.name)?;
        writeln!(f, "type:         {}", self.group_type)?;
        writeln!(f, "members:      {} members", self.members)?;
        match self.synchronized {
            Some(true) => write!(f, "synchronized: Yes"),
            Some(false) => write!(f, "synchronized: No"),
            None => write!(f, "info:         This group has not been set up for this host."),
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.local_database_enabled { "Enabled" } else { "Disabled" };
        writeln!(f, "local accounts:        {state}")?;
        writeln!(f, "synchronized groups:   {}", self.synchronized.join(", "))?;
        write!(f, "unsynchronized groups: {}", self.unsynchronized.join(", "))
    }
}
