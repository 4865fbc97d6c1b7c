//! Operating-system operations that need elevated privileges.
//!
//! The synchronizer only changes ownership, looks up accounts and switches
//! identity through [`Host`], so every reconciliation step can be driven by a
//! recording implementation in tests.

use crate::privilege::{self, PrivilegeError, TargetAccount};
use nix::unistd::{Uid, User};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// Uid of the superuser.
pub const ROOT_UID: u32 = 0;

/// Failure while provisioning one account under its own identity.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// A local account as the name service reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

pub trait Host: Send + Sync {
    /// Owner uid of `path`, without following a final symlink.
    fn owner(&self, path: &Path) -> io::Result<u32> {
        Ok(std::fs::symlink_metadata(path)?.uid())
    }

    /// Change owner and group of `path`, without following a final symlink.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Look up a local account by uid.
    fn lookup_account(&self, uid: u32) -> io::Result<Option<LocalAccount>>;

    /// Run `action` with the effective identity of `account`.
    ///
    /// The original identity is restored before this returns, on success and
    /// on failure alike.
    fn run_as(
        &self,
        account: &LocalAccount,
        action: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<(), ProvisionError>;

    /// Change ownership of `root` and everything beneath it.
    fn chown_recursive(&self, root: &Path, uid: u32, gid: u32) -> io::Result<()> {
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(io::Error::other)?;
            self.chown(entry.path(), uid, gid)?;
        }
        Ok(())
    }
}

/// The real operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn lookup_account(&self, uid: u32) -> io::Result<Option<LocalAccount>> {
        let user = User::from_uid(Uid::from_raw(uid))?;
        Ok(user.map(|u| LocalAccount {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    fn run_as(
        &self,
        account: &LocalAccount,
        action: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<(), ProvisionError> {
        let target = TargetAccount {
            name: account.name.clone(),
            uid: account.uid,
            gid: account.gid,
        };
        privilege::with_dropped_privileges(&target, action)??;
        Ok(())
    }
}
