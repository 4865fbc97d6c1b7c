//! Text input for the indexed passwd, shadow and group databases.
//!
//! Every entry is emitted three times, once per lookup key the database
//! needs: `=<id>` (by id), `0<n>` (by ordinal, for enumeration) and
//! `.<name>` (by name). All three keys of an entry carry identical values.

use super::layout::HomeLayout;
use crate::directory::DirectorySnapshot;
use crate::resolver::ResolvedAccounts;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub const PASSWD_TEXT: &str = "passwd.txt";
pub const SHADOW_TEXT: &str = "shadow.txt";
pub const GROUP_TEXT: &str = "group.txt";

/// Password-change warning period written into every shadow entry.
const SHADOW_WARN_DAYS: u32 = 7;

/// Generated passwd and shadow text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordRecords {
    pub passwd: String,
    pub shadow: String,
}

fn push_keyed(out: &mut String, id: impl std::fmt::Display, ordinal: usize, name: &str, value: &str) {
    out.push_str(&format!("={id} {value}\n0{ordinal} {value}\n.{name} {value}\n"));
}

/// Keep a free-text field from breaking the colon-delimited layout.
fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ':' || c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Build passwd and shadow entries for every resolved account, ordered by uid.
#[must_use]
pub fn password_records(
    resolved: &ResolvedAccounts,
    snapshot: &DirectorySnapshot,
    layout: &HomeLayout,
) -> PasswordRecords {
    let mut records = PasswordRecords::default();
    let accounts = resolved
        .values()
        .filter_map(|account| snapshot.user(account.uid).map(|user| (account, user)));

    for (ordinal, (account, user)) in accounts.enumerate() {
        let uid = account.uid;
        let home = layout.record_home(&user.username);
        let passwd_line = format!(
            "{}:x:{uid}:{uid}:{}:{}:{}",
            user.username,
            sanitize_field(&user.human_name),
            home.display(),
            account.shell,
        );
        let shadow_line = format!(
            "{}:{}::::{SHADOW_WARN_DAYS}:::",
            user.username,
            sanitize_field(&user.password),
        );
        push_keyed(&mut records.passwd, uid, ordinal, &user.username, &passwd_line);
        push_keyed(&mut records.shadow, uid, ordinal, &user.username, &shadow_line);
    }
    records
}

/// Build group entries: one personal group per account (gid = uid), then
/// every remote group with at least one member.
///
/// Ordinals continue from the personal groups into the remote groups.
#[must_use]
pub fn group_records(resolved: &ResolvedAccounts, snapshot: &DirectorySnapshot) -> String {
    let personal = resolved.keys().filter_map(|uid| {
        snapshot
            .user(*uid)
            .map(|user| (*uid, user.username.as_str(), String::new()))
    });

    let remote = snapshot.groups().filter(|g| g.has_members()).map(|group| {
        let mut members: Vec<&str> = group
            .members()
            .into_iter()
            .filter_map(|uid| snapshot.user(uid).map(|u| u.username.as_str()))
            .collect();
        members.sort_unstable();
        (group.id, group.name.as_str(), members.join(","))
    });

    let mut out = String::new();
    for (ordinal, (gid, name, members)) in personal.chain(remote).enumerate() {
        let line = format!("{name}:x:{gid}:{members}");
        push_keyed(&mut out, gid, ordinal, name, &line);
    }
    out
}

/// Write passwd and shadow text into `work_dir`.
///
/// The shadow file is created owner-only before any content is written.
pub async fn write_password_records(
    work_dir: &Path,
    records: &PasswordRecords,
) -> io::Result<(PathBuf, PathBuf)> {
    let passwd_path = work_dir.join(PASSWD_TEXT);
    let shadow_path = work_dir.join(SHADOW_TEXT);

    write_with_mode(&passwd_path, &records.passwd, 0o644).await?;
    write_with_mode(&shadow_path, &records.shadow, 0o600).await?;
    Ok((passwd_path, shadow_path))
}

/// Write group text into `work_dir`.
pub async fn write_group_records(work_dir: &Path, records: &str) -> io::Result<PathBuf> {
    let group_path = work_dir.join(GROUP_TEXT);
    write_with_mode(&group_path, records, 0o644).await?;
    Ok(group_path)
}

async fn write_with_mode(path: &Path, content: &str, mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
