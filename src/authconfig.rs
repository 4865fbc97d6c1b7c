//! Switching local account database usage on and off in the system
//! authentication configuration.

use crate::config::{under_prefix, AuthSection};
use crate::utils::atomic_write;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ENABLED: &str = "yes";
const DISABLED: &str = "no";

#[derive(Error, Debug)]
pub enum AuthConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("{program} exited with {status}: {stderr}")]
    UpdateFailed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Set `key=value` in shell-style settings text.
///
/// The first assignment of `key` is replaced and later duplicates dropped;
/// the assignment is appended when absent. Other lines are kept as is.
#[must_use]
pub fn set_key_line(content: &str, key: &str, value: &str) -> String {
    let assignment = format!("{key}={value}");
    let mut out = Vec::new();
    let mut replaced = false;
    for line in content.lines() {
        if assigned_value(line, key).is_some() {
            if !replaced {
                out.push(assignment.clone());
                replaced = true;
            }
            continue;
        }
        out.push(line.to_string());
    }
    if !replaced {
        out.push(assignment);
    }
    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// Value assigned to `key` in settings text, if any.
#[must_use]
pub fn read_key<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| assigned_value(line, key))
}

fn assigned_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (name, value) = line.trim_start().split_once('=')?;
    (name.trim_end() == key).then(|| value.trim().trim_matches('"'))
}

/// Whether the local account database is switched on.
///
/// A missing configuration file means it is off.
pub async fn local_database_enabled(auth: &AuthSection, prefix: &Path) -> Result<bool, AuthConfigError> {
    let path = under_prefix(prefix, &auth.file);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(read_key(&content, &auth.key) == Some(ENABLED)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Switch the local account database on or off.
///
/// The settings file is rewritten atomically. The update program is only run
/// against the live system (root prefix); when it is not installed a warning
/// is logged and the file change stands.
pub async fn set_local_database(
    auth: &AuthSection,
    prefix: &Path,
    enabled: bool,
) -> Result<(), AuthConfigError> {
    let path = under_prefix(prefix, &auth.file);
    let current = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let value = if enabled { ENABLED } else { DISABLED };
    let updated = set_key_line(&current, &auth.key, value);
    if updated != current {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        atomic_write(&path, &updated, 0o644).await?;
        debug!("Set {}={value} in {}", auth.key, path.display());
    }

    if prefix != Path::new("/") {
        debug!("Not running {} for prefix {}", auth.program, prefix.display());
        return Ok(());
    }
    run_update_program(auth).await
}

async fn run_update_program(auth: &AuthSection) -> Result<(), AuthConfigError> {
    let program = match which::which(&auth.program) {
        Ok(program) => program,
        Err(e) => {
            warn!("{} not available ({e}); settings file updated only", auth.program);
            return Ok(());
        }
    };

    let output = Command::new(&program).args(&auth.args).output().await?;
    if !output.status.success() {
        return Err(AuthConfigError::UpdateFailed {
            program: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!("Ran {}", program.display());
    Ok(())
}
