//! Scoped effective-identity switching.
//!
//! The process identity is captured once at startup with
//! [`capture_original_identity`]. [`with_dropped_privileges`] switches the
//! effective uid, gid and supplementary groups to a target account and
//! restores the captured identity when the scope ends, whether the closure
//! returned normally, returned an error, or unwound.
//!
//! Effective identity is process-wide state: scopes are not reentrant and at
//! most one may be active at a time.

use nix::unistd::{self, Gid, Uid};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("Original process identity was not captured at startup")]
    NotCaptured,

    #[error("A privilege drop is already active")]
    AlreadyDropped,

    #[error("Invalid account name '{0}'")]
    InvalidName(String),

    #[error("Failed to switch identity to {account}: {source}")]
    Switch {
        account: String,
        source: nix::Error,
    },
}

/// Effective identity of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
    pub groups: Vec<Gid>,
}

/// A local account to run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAccount {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

static ORIGINAL_IDENTITY: OnceLock<Identity> = OnceLock::new();
static DROPPED: AtomicBool = AtomicBool::new(false);

/// Record the process identity that every scope restores to.
///
/// Later calls return the identity captured by the first one.
pub fn capture_original_identity() -> Result<&'static Identity, nix::Error> {
    if let Some(identity) = ORIGINAL_IDENTITY.get() {
        return Ok(identity);
    }
    let identity = Identity {
        uid: unistd::geteuid(),
        gid: unistd::getegid(),
        groups: unistd::getgroups()?,
    };
    debug!(uid = identity.uid.as_raw(), gid = identity.gid.as_raw(), "Captured original identity");
    Ok(ORIGINAL_IDENTITY.get_or_init(|| identity))
}

/// Active privilege drop. Dropping it restores the original identity.
#[derive(Debug)]
pub struct DroppedPrivileges {
    original: &'static Identity,
    account: String,
}

impl DroppedPrivileges {
    fn acquire(target: &TargetAccount) -> Result<Self, PrivilegeError> {
        let original = ORIGINAL_IDENTITY.get().ok_or(PrivilegeError::NotCaptured)?;
        let switch_err = |source| PrivilegeError::Switch {
            account: target.name.clone(),
            source,
        };
        let name =
            CString::new(target.name.as_str()).map_err(|_| PrivilegeError::InvalidName(target.name.clone()))?;
        let gid = Gid::from_raw(target.gid);
        let groups = unistd::getgrouplist(&name, gid).map_err(switch_err)?;

        if DROPPED.swap(true, Ordering::SeqCst) {
            return Err(PrivilegeError::AlreadyDropped);
        }
        // From here on the guard owns the flag and restores on every path.
        let guard = Self {
            original,
            account: target.name.clone(),
        };

        // Groups and gid first: changing them needs the privileges seteuid gives up.
        unistd::setgroups(&groups).map_err(switch_err)?;
        unistd::setegid(gid).map_err(switch_err)?;
        unistd::seteuid(Uid::from_raw(target.uid)).map_err(switch_err)?;
        debug!(account = %target.name, uid = target.uid, "Dropped privileges");
        Ok(guard)
    }

    fn restore(&self) -> Result<(), nix::Error> {
        // Regain the original uid first so the gid and groups may be reset.
        unistd::seteuid(self.original.uid)?;
        unistd::setegid(self.original.gid)?;
        unistd::setgroups(&self.original.groups)?;
        Ok(())
    }
}

impl Drop for DroppedPrivileges {
    fn drop(&mut self) {
        match self.restore() {
            Ok(()) => debug!(account = %self.account, "Restored original identity"),
            Err(e) => error!(account = %self.account, "Failed to restore original identity: {e}"),
        }
        DROPPED.store(false, Ordering::SeqCst);
    }
}

/// Run `f` with the effective identity of `target`, restoring afterwards.
pub fn with_dropped_privileges<T>(
    target: &TargetAccount,
    f: impl FnOnce() -> T,
) -> Result<T, PrivilegeError> {
    let guard = DroppedPrivileges::acquire(target)?;
    let value = f();
    drop(guard);
    Ok(value)
}

/// Whether a privilege drop is currently active.
#[must_use]
pub fn is_dropped() -> bool {
    DROPPED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_is_stable() {
        let first = capture_original_identity().unwrap().clone();
        let second = capture_original_identity().unwrap();
        assert_eq!(&first, second);
        assert_eq!(first.uid, unistd::geteuid());
    }

    #[test]
    fn test_invalid_name_is_rejected_before_switching() {
        capture_original_identity().unwrap();
        let target = TargetAccount {
            name: "bad\0name".to_string(),
            uid: 4242,
            gid: 4242,
        };
        let before = unistd::geteuid();
        let result = with_dropped_privileges(&target, || ());
        assert!(matches!(result, Err(PrivilegeError::InvalidName(_))));
        assert!(!is_dropped(), "rejected acquisition must not hold the scope");
        assert_eq!(unistd::geteuid(), before);
    }
}
