//! Fakes for exercising the pipeline without privileges or `makedb`.

use crate::accounts::{Host, LocalAccount, ProvisionError, ROOT_UID};
use crate::nssdb::{DatabaseCompiler, NssDbError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Host`] that records ownership changes instead of applying them.
#[derive(Default)]
pub struct RecordingHost {
    owners: Mutex<HashMap<PathBuf, (u32, u32)>>,
    accounts: BTreeMap<u32, LocalAccount>,
    failing_accounts: BTreeSet<u32>,
    superuser_owned: bool,
    run_as_calls: Mutex<Vec<u32>>,
}

impl RecordingHost {
    #[must_use]
    pub fn with_account(mut self, name: &str, uid: u32) -> Self {
        self.accounts.insert(
            uid,
            LocalAccount {
                name: name.to_string(),
                uid,
                gid: uid,
            },
        );
        self
    }

    #[must_use]
    pub fn with_accounts(self, accounts: &[(&str, u32)]) -> Self {
        accounts
            .iter()
            .fold(self, |host, (name, uid)| host.with_account(name, *uid))
    }

    /// Identity switches to `uid` fail as if the drop were refused.
    #[must_use]
    pub fn failing_for(mut self, uid: u32) -> Self {
        self.failing_accounts.insert(uid);
        self
    }

    /// Paths with no recorded owner count as superuser-owned, like a fresh
    /// system, instead of reporting their real owner.
    #[must_use]
    pub fn superuser_owned(mut self) -> Self {
        self.superuser_owned = true;
        self
    }

    pub fn set_owner(&self, path: &Path, uid: u32) {
        locked(&self.owners).insert(path.to_path_buf(), (uid, uid));
    }

    #[must_use]
    pub fn recorded_owner(&self, path: &Path) -> Option<u32> {
        locked(&self.owners).get(path).map(|o| o.0)
    }

    /// Uids passed to `run_as`, in call order.
    #[must_use]
    pub fn run_as_calls(&self) -> Vec<u32> {
        locked(&self.run_as_calls).clone()
    }
}

impl Host for RecordingHost {
    fn owner(&self, path: &Path) -> io::Result<u32> {
        let metadata = std::fs::symlink_metadata(path)?;
        if let Some(owner) = self.recorded_owner(path) {
            return Ok(owner);
        }
        Ok(if self.superuser_owned {
            ROOT_UID
        } else {
            metadata.uid()
        })
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::fs::symlink_metadata(path)?;
        locked(&self.owners).insert(path.to_path_buf(), (uid, gid));
        Ok(())
    }

    fn lookup_account(&self, uid: u32) -> io::Result<Option<LocalAccount>> {
        Ok(self.accounts.get(&uid).cloned())
    }

    fn run_as(
        &self,
        account: &LocalAccount,
        action: &mut dyn FnMut() -> io::Result<()>,
    ) -> Result<(), ProvisionError> {
        locked(&self.run_as_calls).push(account.uid);
        if self.failing_accounts.contains(&account.uid) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "refused").into());
        }
        action()?;
        Ok(())
    }
}

/// "Compiles" by copying the text input; fails for inputs named in `fail_on`.
#[derive(Default)]
pub struct CopyCompiler {
    pub fail_on: Vec<&'static str>,
    calls: Mutex<Vec<PathBuf>>,
}

impl CopyCompiler {
    #[must_use]
    pub fn failing_on(input: &'static str) -> Self {
        Self {
            fail_on: vec![input],
            ..Self::default()
        }
    }

    /// Inputs compiled so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PathBuf> {
        locked(&self.calls).clone()
    }
}

#[async_trait]
impl DatabaseCompiler for CopyCompiler {
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), NssDbError> {
        locked(&self.calls).push(input.to_path_buf());
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.fail_on.contains(&name.as_str()) {
            return Err(NssDbError::CompileFailed {
                input: name,
                status: "exit status: 1".to_string(),
                stderr: "duplicate key".to_string(),
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}
