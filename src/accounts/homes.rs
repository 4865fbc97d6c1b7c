//! Home directory creation, restoration and stale lockdown.

use super::host::{Host, ROOT_UID};
use super::layout::HomeLayout;
use super::mode_cache::ModeCache;
use crate::directory::DirectorySnapshot;
use crate::resolver::ResolvedAccounts;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use walkdir::WalkDir;

/// Mode of a newly created home base.
pub const HOME_BASE_MODE: u32 = 0o755;
/// Mode given back to a returning account with no recorded mode.
pub const DEFAULT_HOME_MODE: u32 = 0o755;
/// Mode of a locked home directory.
pub const LOCKED_MODE: u32 = 0o700;

#[derive(Error, Debug)]
pub enum HomeError {
    #[error("Failed to prepare home base {path}: {source}")]
    Base {
        path: String,
        source: io::Error,
    },
}

/// What happened to home directories during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HomeReport {
    pub created: Vec<String>,
    pub restored: Vec<String>,
    pub failed: Vec<String>,
}

/// Ensure every resolved account has a home directory it owns.
///
/// Missing homes are copied from the skeleton. Existing homes owned by the
/// superuser (locked on an earlier run) get their recorded mode back, or the
/// default mode, and are handed back to the account. Per-account failures
/// are logged and reported; only a missing home base is fatal.
pub fn create_home_directories(
    layout: &HomeLayout,
    resolved: &ResolvedAccounts,
    snapshot: &DirectorySnapshot,
    modes: &ModeCache,
    host: &dyn Host,
) -> Result<HomeReport, HomeError> {
    ensure_home_base(&layout.base)?;

    let mut report = HomeReport::default();
    for uid in resolved.keys() {
        let Some(user) = snapshot.user(*uid) else {
            continue;
        };
        let Some(home) = layout.home_dir(&user.username) else {
            error!(username = ?user.username, uid, "Home directory would fall outside {}", layout.base.display());
            report.failed.push(user.username.clone());
            continue;
        };
        let outcome = if home.exists() {
            reclaim_home(&home, &user.username, *uid, modes, host).map(|restored| {
                if restored {
                    report.restored.push(user.username.clone());
                }
            })
        } else {
            info!(username = %user.username, "Creating home directory {}", home.display());
            copy_skeleton(&layout.skeleton, &home)
                .and_then(|()| host.chown_recursive(&home, *uid, *uid))
                .map(|()| report.created.push(user.username.clone()))
        };
        if let Err(e) = outcome {
            error!(username = %user.username, uid, "Failed to set up home directory {}: {e}", home.display());
            report.failed.push(user.username.clone());
        }
    }
    Ok(report)
}

fn ensure_home_base(base: &Path) -> Result<(), HomeError> {
    if base.exists() {
        return Ok(());
    }
    DirBuilder::new()
        .recursive(true)
        .mode(HOME_BASE_MODE)
        .create(base)
        .map_err(|source| HomeError::Base {
            path: base.display().to_string(),
            source,
        })
}

/// Returns whether the home had been locked and was handed back.
fn reclaim_home(
    home: &Path,
    username: &str,
    uid: u32,
    modes: &ModeCache,
    host: &dyn Host,
) -> io::Result<bool> {
    if host.owner(home)? != ROOT_UID {
        return Ok(false);
    }
    let mode = modes.get(username).unwrap_or(DEFAULT_HOME_MODE);
    info!(username, "Restoring home directory {} with mode {mode:o}", home.display());
    fs::set_permissions(home, Permissions::from_mode(mode))?;
    host.chown(home, uid, uid)?;
    Ok(true)
}

/// Copy the skeleton tree to `home`, preserving modes and symlinks.
fn copy_skeleton(skeleton: &Path, home: &Path) -> io::Result<()> {
    if !skeleton.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("skeleton directory {} not found", skeleton.display()),
        ));
    }
    for entry in WalkDir::new(skeleton) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(skeleton)
            .map_err(io::Error::other)?;
        let target = home.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, entry.metadata().map_err(io::Error::other)?.permissions())?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Lock every home directory under the base that belongs to no resolved account.
///
/// Returns the permission bits each newly locked directory had, keyed by
/// username, for merging into the persisted [`ModeCache`].
pub fn lock_stale_home_directories(
    layout: &HomeLayout,
    resolved: &ResolvedAccounts,
    snapshot: &DirectorySnapshot,
    host: &dyn Host,
) -> io::Result<BTreeMap<String, u32>> {
    let valid: BTreeSet<&str> = resolved
        .keys()
        .filter_map(|uid| snapshot.user(*uid))
        .map(|u| u.username.as_str())
        .collect();

    let mut recorded = BTreeMap::new();
    for entry in fs::read_dir(&layout.base)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if valid.contains(name.as_str()) {
            continue;
        }
        let home = entry.path();
        match lock_if_owned(&home, host) {
            Ok(Some(mode)) => {
                info!(username = %name, "Locked permissions on {}", home.display());
                recorded.insert(name, mode);
            }
            Ok(None) => {}
            Err(e) => error!(username = %name, "Failed to lock {}: {e}", home.display()),
        }
    }
    Ok(recorded)
}

/// Lock `home` unless it is not a directory or is already superuser-owned.
/// Returns the permission bits it had before locking.
fn lock_if_owned(home: &Path, host: &dyn Host) -> io::Result<Option<u32>> {
    let metadata = fs::symlink_metadata(home)?;
    if !metadata.is_dir() || host.owner(home)? == ROOT_UID {
        return Ok(None);
    }
    let mode = metadata.permissions().mode() & 0o7777;
    lock_home_directory(home, host)?;
    Ok(Some(mode))
}

/// Make a home directory owner-only and owned by the superuser.
pub fn lock_home_directory(home: &Path, host: &dyn Host) -> io::Result<()> {
    fs::set_permissions(home, Permissions::from_mode(LOCKED_MODE))?;
    host.chown(home, ROOT_UID, ROOT_UID)
}

#[cfg(test)]
#[path = "homes_tests.rs"]
mod tests;
