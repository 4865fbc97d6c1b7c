//! `authorized_keys` management.

use super::homes::lock_home_directory;
use super::host::Host;
use super::layout::HomeLayout;
use crate::directory::{DirectorySnapshot, RemoteUser};
use crate::resolver::{ResolvedAccount, ResolvedAccounts};
use crate::utils::atomic_write_sync;
use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const SSH_DIR: &str = ".ssh";
pub const AUTHORIZED_KEYS: &str = "authorized_keys";
const SSH_DIR_MODE: u32 = 0o700;
const KEY_FILE_MODE: u32 = 0o600;

/// Effect of one [`write_ssh_key`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Written,
    Unchanged,
    Removed,
    Absent,
}

/// Result of provisioning keys for every resolved account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyReport {
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Accounts whose home was locked after a failure.
    pub locked: Vec<String>,
    /// Accounts with no local account to switch to.
    pub skipped: Vec<String>,
}

#[must_use]
pub fn authorized_keys_path(home: &Path) -> PathBuf {
    home.join(SSH_DIR).join(AUTHORIZED_KEYS)
}

/// Escape a forced command for the `command="..."` option.
fn quote_command(command: &str) -> String {
    command.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The authorized_keys content for an account, or `None` without key material.
///
/// Each key line is prefixed with the account's forced command and options
/// when it has any.
#[must_use]
pub fn authorized_keys_content(user: &RemoteUser, account: &ResolvedAccount) -> Option<String> {
    let mut prefix_parts = Vec::new();
    if !account.ssh_command.is_empty() {
        prefix_parts.push(format!("command=\"{}\"", quote_command(&account.ssh_command)));
    }
    if !account.ssh_options.is_empty() {
        prefix_parts.push(account.ssh_options.clone());
    }
    let prefix = prefix_parts.join(",");

    let lines: Vec<String> = user
        .ssh_keys()
        .map(|key| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix} {key}")
            }
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    Some(content)
}

/// Bring `<home>/.ssh/authorized_keys` in line with the user's key material.
///
/// The file is only rewritten when its content differs. Without key material
/// the file is removed; an already absent file is not an error.
pub fn write_ssh_key(home: &Path, user: &RemoteUser, account: &ResolvedAccount) -> io::Result<KeyOutcome> {
    let key_file = authorized_keys_path(home);

    let Some(content) = authorized_keys_content(user, account) else {
        return match fs::remove_file(&key_file) {
            Ok(()) => Ok(KeyOutcome::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(KeyOutcome::Absent),
            Err(e) => Err(e),
        };
    };

    let ssh_dir = home.join(SSH_DIR);
    if !ssh_dir.exists() {
        DirBuilder::new().mode(SSH_DIR_MODE).create(&ssh_dir)?;
    }

    let current = match fs::read(&key_file) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    if current.as_deref() == Some(content.as_bytes()) {
        let mode = fs::metadata(&key_file)?.permissions().mode() & 0o7777;
        if mode != KEY_FILE_MODE {
            fs::set_permissions(&key_file, Permissions::from_mode(KEY_FILE_MODE))?;
        }
        return Ok(KeyOutcome::Unchanged);
    }

    atomic_write_sync(&key_file, content.as_bytes(), KEY_FILE_MODE)?;
    Ok(KeyOutcome::Written)
}

/// Write keys for every resolved account under that account's own identity.
///
/// A failure for one account locks that account's home directory and moves
/// on; the original identity is back in place before the next account.
pub fn provision_ssh_keys(
    layout: &HomeLayout,
    resolved: &ResolvedAccounts,
    snapshot: &DirectorySnapshot,
    host: &dyn Host,
) -> KeyReport {
    let mut report = KeyReport::default();
    for account in resolved.values() {
        let Some(user) = snapshot.user(account.uid) else {
            continue;
        };
        let local = match host.lookup_account(account.uid) {
            Ok(Some(local)) => local,
            Ok(None) => {
                warn!(uid = account.uid, username = %user.username, "No local account; skipping SSH keys");
                report.skipped.push(user.username.clone());
                continue;
            }
            Err(e) => {
                warn!(uid = account.uid, "Account lookup failed: {e}");
                report.skipped.push(user.username.clone());
                continue;
            }
        };

        let Some(home) = layout.home_dir(&user.username) else {
            warn!(uid = account.uid, username = ?user.username, "Home directory would fall outside the home base; skipping SSH keys");
            report.skipped.push(user.username.clone());
            continue;
        };
        let mut outcome = None;
        let result = host.run_as(&local, &mut || {
            outcome = Some(write_ssh_key(&home, user, account)?);
            Ok(())
        });

        match (result, outcome) {
            (Ok(()), Some(KeyOutcome::Written)) => {
                info!(username = %user.username, "Updated SSH keys");
                report.written.push(user.username.clone());
            }
            (Ok(()), Some(KeyOutcome::Removed)) => {
                info!(username = %user.username, "Removed SSH keys");
                report.removed.push(user.username.clone());
            }
            (Ok(()), _) => {
                debug!(username = %user.username, "SSH keys up to date");
                report.unchanged.push(user.username.clone());
            }
            (Err(e), _) => {
                error!(
                    uid = account.uid,
                    username = %user.username,
                    "Error when creating SSH key: {e}. Locking their home directory, please investigate."
                );
                if let Err(lock_err) = lock_home_directory(&home, host) {
                    error!(username = %user.username, "Failed to lock {}: {lock_err}", home.display());
                }
                report.locked.push(user.username.clone());
            }
        }
    }
    report
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
