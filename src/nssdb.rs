//! Compiling text records into indexed NSS databases and installing them.
//!
//! Every selected database is compiled before any is installed, and every
//! compiled file is staged next to its destination before any is renamed
//! into place. A failed compile leaves the installed databases untouched.

use async_trait::async_trait;
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NssDbError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("Compiling {input} failed ({status}): {stderr}")]
    CompileFailed {
        input: String,
        status: String,
        stderr: String,
    },

    #[error("Install task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One of the databases the synchronizer maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Database {
    Passwd,
    Shadow,
    Group,
}

impl Database {
    pub const ALL: [Database; 3] = [Database::Passwd, Database::Shadow, Database::Group];

    #[must_use]
    pub fn text_name(self) -> &'static str {
        match self {
            Database::Passwd => crate::accounts::records::PASSWD_TEXT,
            Database::Shadow => crate::accounts::records::SHADOW_TEXT,
            Database::Group => crate::accounts::records::GROUP_TEXT,
        }
    }

    #[must_use]
    pub fn db_name(self) -> &'static str {
        match self {
            Database::Passwd => "passwd.db",
            Database::Shadow => "shadow.db",
            Database::Group => "group.db",
        }
    }

    /// Permission bits of the installed database.
    #[must_use]
    pub fn mode(self) -> u32 {
        match self {
            Database::Shadow => 0o600,
            Database::Passwd | Database::Group => 0o644,
        }
    }
}

/// Turns key/value text input into an indexed database file.
#[async_trait]
pub trait DatabaseCompiler: Send + Sync {
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), NssDbError>;
}

/// The glibc `makedb` tool.
#[derive(Debug, Clone)]
pub struct Makedb {
    program: PathBuf,
}

impl Makedb {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DatabaseCompiler for Makedb {
    async fn compile(&self, input: &Path, output: &Path) -> Result<(), NssDbError> {
        let result = Command::new(&self.program)
            .arg("-o")
            .arg(output)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| NssDbError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            return Err(NssDbError::CompileFailed {
                input: input.display().to_string(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        debug!("Compiled {} into {}", input.display(), output.display());
        Ok(())
    }
}

/// A database compiled in the working directory, not yet installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDatabase {
    pub database: Database,
    pub path: PathBuf,
}

/// Compile each selected database from its text file in `work_dir`.
///
/// Stops at the first failure; nothing is installed by this step.
pub async fn compile_databases(
    compiler: &dyn DatabaseCompiler,
    work_dir: &Path,
    databases: &[Database],
) -> Result<Vec<CompiledDatabase>, NssDbError> {
    let mut compiled = Vec::with_capacity(databases.len());
    for database in databases {
        let input = work_dir.join(database.text_name());
        let output = work_dir.join(database.db_name());
        compiler.compile(&input, &output).await?;
        compiled.push(CompiledDatabase {
            database: *database,
            path: output,
        });
    }
    Ok(compiled)
}

/// Move compiled databases into `db_dir`, returning the installed paths.
pub async fn install_databases(
    compiled: Vec<CompiledDatabase>,
    db_dir: PathBuf,
) -> Result<Vec<PathBuf>, NssDbError> {
    let installed = tokio::task::spawn_blocking(move || install_blocking(&compiled, &db_dir)).await??;
    for path in &installed {
        info!("Installed {}", path.display());
    }
    Ok(installed)
}

fn install_blocking(compiled: &[CompiledDatabase], db_dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(db_dir)?;

    let mut staged = Vec::with_capacity(compiled.len());
    for item in compiled {
        let content = fs::read(&item.path)?;
        let mut temp_file = NamedTempFile::new_in(db_dir)?;
        temp_file
            .as_file()
            .set_permissions(Permissions::from_mode(item.database.mode()))?;
        temp_file.write_all(&content)?;
        temp_file.as_file().sync_all()?;
        staged.push((temp_file, db_dir.join(item.database.db_name())));
    }

    let mut installed = Vec::with_capacity(staged.len());
    for (temp_file, target) in staged {
        temp_file.persist(&target).map_err(|e| e.error)?;
        installed.push(target);
    }
    Ok(installed)
}
