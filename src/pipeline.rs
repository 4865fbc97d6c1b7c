//! One full synchronization run.
//!
//! Directory snapshot, membership resolution, record generation, database
//! compile and install, home directories, auth configuration, then SSH keys.
//! Record and database failures abort the run before anything is installed;
//! per-account failures are collected into the report.

use crate::accounts::{
    create_home_directories, group_records, lock_stale_home_directories, password_records,
    provision_ssh_keys, write_group_records, write_password_records, HomeError, HomeLayout,
    HomeReport, Host, KeyReport, ModeCache,
};
use crate::authconfig::{set_local_database, AuthConfigError};
use crate::config::{under_prefix, SyncConfig};
use crate::directory::{AccountDirectory, DirectoryError, DirectorySnapshot};
use crate::nssdb::{compile_databases, install_databases, Database, DatabaseCompiler, NssDbError};
use crate::resolver::{resolve, AccountPolicy, AgreementRule, ResolveError, ResolvedAccounts};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

const WORK_DIR_PREFIX: &str = "acctsync-";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Failed to write records: {0}")]
    Records(std::io::Error),

    #[error("Failed to prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("NSS database error: {0}")]
    NssDb(#[from] NssDbError),

    #[error("Home directory error: {0}")]
    Home(#[from] HomeError),

    #[error("Failed to lock stale home directories: {0}")]
    StaleHomes(std::io::Error),

    #[error("Auth configuration error: {0}")]
    Auth(#[from] AuthConfigError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Which stages of a run to perform, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Root every installed path is resolved under.
    pub prefix: PathBuf,
    pub homes: bool,
    pub groups: bool,
    pub passwords: bool,
    pub shadow: bool,
    pub ssh_keys: bool,
    pub force_refresh: bool,
    /// Switch local database usage on or off after installing; `None` leaves it.
    pub local_auth: Option<bool>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("/"),
            homes: true,
            groups: true,
            passwords: true,
            shadow: true,
            ssh_keys: true,
            force_refresh: false,
            local_auth: Some(true),
        }
    }
}

impl InstallOptions {
    fn databases(&self) -> Vec<Database> {
        let mut databases = Vec::new();
        if self.passwords {
            databases.push(Database::Passwd);
        }
        if self.shadow {
            databases.push(Database::Shadow);
        }
        if self.groups {
            databases.push(Database::Group);
        }
        databases
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub accounts: usize,
    pub installed: Vec<PathBuf>,
    pub homes: Option<HomeReport>,
    /// Homes locked by this run, with the mode each had before.
    pub locked_homes: BTreeMap<String, u32>,
    pub keys: Option<KeyReport>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<SyncConfig>,
    directory: Arc<dyn AccountDirectory>,
    compiler: Arc<dyn DatabaseCompiler>,
    host: Arc<dyn Host>,
}

impl Pipeline {
    pub fn new(
        config: Arc<SyncConfig>,
        directory: Arc<dyn AccountDirectory>,
        compiler: Arc<dyn DatabaseCompiler>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            config,
            directory,
            compiler,
            host,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Resolve the accounts this host should carry.
    pub async fn resolve(
        &self,
        force_refresh: bool,
    ) -> Result<(DirectorySnapshot, ResolvedAccounts), PipelineError> {
        let snapshot = self
            .directory
            .snapshot(force_refresh)
            .await?
            .with_min_id(self.config.sync.min_id);
        let rule = AgreementRule {
            group: &self.config.sync.agreement_group,
            reserved_prefix: &self.config.sync.agreement_group_prefix,
        };
        let policy = AccountPolicy::from_config(&self.config);
        let resolved = resolve(
            &self.config.sync.groups,
            &self.config.sync.restricted_groups,
            &snapshot,
            &rule,
            &policy,
        )?;
        Ok((snapshot, resolved))
    }

    #[instrument(skip(self), fields(prefix = %options.prefix.display()))]
    pub async fn run(&self, options: &InstallOptions) -> Result<SyncReport, PipelineError> {
        let (snapshot, resolved) = self.resolve(options.force_refresh).await?;
        info!(accounts = resolved.len(), "Resolved accounts");

        let layout = HomeLayout::from_config(&self.config, &options.prefix);
        let mut report = SyncReport {
            accounts: resolved.len(),
            ..SyncReport::default()
        };

        report.installed = self
            .build_databases(options, &snapshot, &resolved, &layout)
            .await?;

        let snapshot = Arc::new(snapshot);
        let resolved = Arc::new(resolved);

        if options.homes {
            let (homes, locked) = self
                .reconcile_homes(layout.clone(), Arc::clone(&snapshot), Arc::clone(&resolved))
                .await?;
            report.homes = Some(homes);
            report.locked_homes = locked;
        }

        // Key provisioning looks accounts up through the freshly installed databases.
        if let Some(enabled) = options.local_auth {
            set_local_database(&self.config.auth, &options.prefix, enabled).await?;
        }

        if options.ssh_keys {
            let host = Arc::clone(&self.host);
            let keys = tokio::task::spawn_blocking(move || {
                provision_ssh_keys(&layout, &resolved, &snapshot, host.as_ref())
            })
            .await?;
            report.keys = Some(keys);
        }

        Ok(report)
    }

    async fn build_databases(
        &self,
        options: &InstallOptions,
        snapshot: &DirectorySnapshot,
        resolved: &ResolvedAccounts,
        layout: &HomeLayout,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let databases = options.databases();
        if databases.is_empty() {
            return Ok(Vec::new());
        }

        let work_dir = create_work_dir(&self.config.sync.temp_dir).await?;

        if options.passwords || options.shadow {
            let records = password_records(resolved, snapshot, layout);
            write_password_records(work_dir.path(), &records)
                .await
                .map_err(PipelineError::Records)?;
        }
        if options.groups {
            let records = group_records(resolved, snapshot);
            write_group_records(work_dir.path(), &records)
                .await
                .map_err(PipelineError::Records)?;
        }

        let compiled = compile_databases(self.compiler.as_ref(), work_dir.path(), &databases).await?;
        let db_dir = under_prefix(&options.prefix, &self.config.nss.db_dir);
        let installed = install_databases(compiled, db_dir).await?;
        Ok(installed)
    }

    async fn reconcile_homes(
        &self,
        layout: HomeLayout,
        snapshot: Arc<DirectorySnapshot>,
        resolved: Arc<ResolvedAccounts>,
    ) -> Result<(HomeReport, BTreeMap<String, u32>), PipelineError> {
        let mode_file = &self.config.sync.mode_file;
        let mut modes = ModeCache::load(mode_file).await;

        let host = Arc::clone(&self.host);
        let cached = modes.clone();
        let (homes, locked) = tokio::task::spawn_blocking(move || {
            let homes = create_home_directories(&layout, &resolved, &snapshot, &cached, host.as_ref())?;
            let locked = lock_stale_home_directories(&layout, &resolved, &snapshot, host.as_ref())
                .map_err(PipelineError::StaleHomes)?;
            Ok::<_, PipelineError>((homes, locked))
        })
        .await??;

        modes.merge(locked.clone());
        modes.save(mode_file).await;
        Ok((homes, locked))
    }
}

async fn create_work_dir(temp_dir: &Path) -> Result<tempfile::TempDir, PipelineError> {
    let to_error = |source: std::io::Error| PipelineError::WorkDir {
        path: temp_dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(temp_dir).await.map_err(to_error)?;
    tempfile::Builder::new()
        .prefix(WORK_DIR_PREFIX)
        .tempdir_in(temp_dir)
        .map_err(to_error)
}
