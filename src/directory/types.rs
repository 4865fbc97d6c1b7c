//! Remote account and group records.
//!
//! A [`DirectorySnapshot`] is fetched once at the start of a run and passed by
//! reference through the resolver and the local synchronizer. Nothing in it is
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// Numeric identifier shared by a remote user and its local account.
pub type Uid = u32;

/// Numeric identifier of a remote group.
pub type Gid = u32;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory server returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid directory URL '{0}'")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Upstream account state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Expired,
    Disabled,
    #[serde(other)]
    Unknown,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        }
    }
}

/// A user as the directory service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: Uid,
    pub username: String,
    #[serde(default)]
    pub human_name: String,
    /// Password hash, copied verbatim into the shadow database.
    #[serde(default)]
    pub password: String,
    /// Zero or more public keys, newline-delimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
}

impl RemoteUser {
    /// Non-empty key lines of the user's SSH key material.
    pub fn ssh_keys(&self) -> impl Iterator<Item = &str> {
        self.ssh_key
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }

    #[must_use]
    pub fn has_ssh_keys(&self) -> bool {
        self.ssh_keys().next().is_some()
    }
}

/// A group as the directory service reports it.
///
/// The three role sets are disjoint; their union is the group membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: Gid,
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
    #[serde(default)]
    pub administrators: BTreeSet<Uid>,
    #[serde(default)]
    pub sponsors: BTreeSet<Uid>,
    #[serde(default)]
    pub users: BTreeSet<Uid>,
}

impl RemoteGroup {
    /// Union of administrators, sponsors and regular users.
    #[must_use]
    pub fn members(&self) -> BTreeSet<Uid> {
        self.administrators
            .iter()
            .chain(&self.sponsors)
            .chain(&self.users)
            .copied()
            .collect()
    }

    #[must_use]
    pub fn has_members(&self) -> bool {
        !(self.administrators.is_empty() && self.sponsors.is_empty() && self.users.is_empty())
    }
}

/// Whether `name` can be used as a local account or group name.
///
/// Names become path components under the home base and keys in the
/// colon-delimited databases, so separators, whitespace and control
/// characters are refused along with `.` and `..`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
        && !name
            .chars()
            .any(|c| matches!(c, '/' | ':' | ',') || c.is_whitespace() || c.is_control())
}

/// Immutable view of every user and group for one synchronization run.
///
/// Users and groups with an invalid name or the superuser id are dropped on
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    users: BTreeMap<Uid, RemoteUser>,
    groups: BTreeMap<String, RemoteGroup>,
}

impl DirectorySnapshot {
    #[must_use]
    pub fn new(users: Vec<RemoteUser>, groups: Vec<RemoteGroup>) -> Self {
        Self {
            users: users
                .into_iter()
                .filter(|u| accept("user", &u.username, u.id, SUPERUSER_ID))
                .map(|u| (u.id, u))
                .collect(),
            groups: groups
                .into_iter()
                .filter(|g| accept("group", &g.name, g.id, SUPERUSER_ID))
                .map(|g| (g.name.clone(), g))
                .collect(),
        }
    }

    /// Drop users and groups whose id is below `min_id`.
    #[must_use]
    pub fn with_min_id(mut self, min_id: u32) -> Self {
        self.users.retain(|_, u| accept("user", &u.username, u.id, min_id));
        self.groups.retain(|_, g| accept("group", &g.name, g.id, min_id));
        self
    }

    #[must_use]
    pub fn user(&self, uid: Uid) -> Option<&RemoteUser> {
        self.users.get(&uid)
    }

    #[must_use]
    pub fn user_by_name(&self, username: &str) -> Option<&RemoteUser> {
        self.users.values().find(|u| u.username == username)
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&RemoteGroup> {
        self.groups.get(name)
    }

    /// Users ordered by uid.
    pub fn users(&self) -> impl Iterator<Item = &RemoteUser> {
        self.users.values()
    }

    /// Groups ordered by name.
    pub fn groups(&self) -> impl Iterator<Item = &RemoteGroup> {
        self.groups.values()
    }

    /// Names of every group the user belongs to in any role.
    #[must_use]
    pub fn memberships(&self, uid: Uid) -> Vec<&str> {
        self.groups
            .values()
            .filter(|g| g.members().contains(&uid))
            .map(|g| g.name.as_str())
            .collect()
    }
}

/// Id shared by the superuser account and group.
const SUPERUSER_ID: u32 = 0;

fn accept(kind: &str, name: &str, id: u32, min_id: u32) -> bool {
    if !is_valid_name(name) {
        warn!(kind, id, name = ?name, "Invalid name from the directory; skipping");
        return false;
    }
    if id == SUPERUSER_ID || id < min_id {
        warn!(kind, id, name, "Id is reserved for system accounts; skipping");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, admins: &[Uid], sponsors: &[Uid], users: &[Uid]) -> RemoteGroup {
        RemoteGroup {
            id: 1000,
            name: name.to_string(),
            group_type: "git".to_string(),
            administrators: admins.iter().copied().collect(),
            sponsors: sponsors.iter().copied().collect(),
            users: users.iter().copied().collect(),
        }
    }

    #[test]
    fn test_group_members_is_union_of_roles() {
        let g = group("packagers", &[1], &[2], &[3, 1]);
        assert_eq!(g.members().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(g.has_members());
        assert!(!group("empty", &[], &[], &[]).has_members());
    }

    #[test]
    fn test_ssh_keys_skips_blank_lines() {
        let user = RemoteUser {
            id: 100,
            username: "alice".to_string(),
            human_name: String::new(),
            password: String::new(),
            ssh_key: Some("ssh-ed25519 AAAA a@h\n\n  \nssh-rsa BBBB a@w\n".to_string()),
            status: AccountStatus::Active,
        };
        assert_eq!(
            user.ssh_keys().collect::<Vec<_>>(),
            vec!["ssh-ed25519 AAAA a@h", "ssh-rsa BBBB a@w"]
        );

        let blank = RemoteUser { ssh_key: Some("\n \n".to_string()), ..user };
        assert!(!blank.has_ssh_keys());
    }

    #[test]
    fn test_group_deserializes_type_field() {
        let json = r#"{"id": 7, "name": "sysadmin", "type": "tracking", "users": [5, 6]}"#;
        let g: RemoteGroup = serde_json::from_str(json).unwrap();
        assert_eq!(g.group_type, "tracking");
        assert!(g.administrators.is_empty());
        assert_eq!(g.users.len(), 2);
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let json = r#"{"id": 1, "username": "bob", "status": "on_vacation"}"#;
        let u: RemoteUser = serde_json::from_str(json).unwrap();
        assert_eq!(u.status, AccountStatus::Unknown);
        assert_eq!(u.status.as_str(), "unknown");
    }

    #[test]
    fn test_snapshot_memberships() {
        let snapshot = DirectorySnapshot::new(
            vec![],
            vec![group("a", &[1], &[], &[]), group("b", &[], &[], &[2]), group("c", &[], &[1], &[])],
        );
        assert_eq!(snapshot.memberships(1), vec!["a", "c"]);
        assert!(snapshot.memberships(9).is_empty());
    }

    fn user(id: Uid, name: &str) -> RemoteUser {
        RemoteUser {
            id,
            username: name.to_string(),
            human_name: String::new(),
            password: String::new(),
            ssh_key: None,
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn test_name_validation() {
        for name in ["alice", "bob.smith", "a_b-c", "x1"] {
            assert!(is_valid_name(name), "{name}");
        }
        for name in ["", ".", "..", "../victim", "a/b", "a:b", "a,b", "a b", "a\nb", "a\tb", "a\u{7f}"] {
            assert!(!is_valid_name(name), "{name:?}");
        }
    }

    #[test]
    fn test_snapshot_drops_unsafe_users() {
        let snapshot = DirectorySnapshot::new(
            vec![
                user(101, "alice"),
                user(102, "../victim"),
                user(103, "eve:x:0:0"),
                user(104, "mal\nroot::0:0"),
                user(105, ""),
                user(0, "toor"),
            ],
            vec![],
        );
        assert_eq!(
            snapshot.users().map(|u| u.username.as_str()).collect::<Vec<_>>(),
            vec!["alice"]
        );
    }

    #[test]
    fn test_snapshot_drops_unsafe_groups() {
        let mut root = group("wheel", &[], &[], &[1]);
        root.id = 0;
        let snapshot = DirectorySnapshot::new(
            vec![],
            vec![group("packagers", &[], &[], &[1]), group("bad group", &[], &[], &[1]), root],
        );
        assert_eq!(
            snapshot.groups().map(|g| g.name.as_str()).collect::<Vec<_>>(),
            vec!["packagers"]
        );
    }

    #[test]
    fn test_with_min_id_drops_system_range() {
        let mut system = group("adm", &[], &[], &[101]);
        system.id = 4;
        let snapshot = DirectorySnapshot::new(
            vec![user(101, "alice"), user(999, "daemon2"), user(1000, "bob")],
            vec![system, group("packagers", &[], &[], &[101])],
        )
        .with_min_id(100);
        assert!(snapshot.user(101).is_some());
        assert!(snapshot.user(999).is_some());
        let snapshot = snapshot.with_min_id(1000);
        assert!(snapshot.user(101).is_none());
        assert!(snapshot.user(999).is_none());
        assert!(snapshot.user(1000).is_some());
        assert!(snapshot.group("adm").is_none());
        assert!(snapshot.group("packagers").is_some());
    }
}
