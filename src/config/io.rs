use super::types::{ConfigError, SyncConfig};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/acctsync/config.toml";

/// Parse configuration text and check the keys a sync run cannot do without.
pub fn parse_config(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Read the configuration file at `path` without validating it, so that
/// command-line overrides can be applied first.
pub async fn read_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config = toml::from_str(&content)?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub async fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let config = read_config(path).await?;
    config.validate()?;
    Ok(config)
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.url.trim().is_empty() && self.directory.snapshot.is_none() {
            return Err(ConfigError::MissingKey("directory.url"));
        }
        if self.sync.agreement_group.trim().is_empty() {
            return Err(ConfigError::MissingKey("sync.agreement_group"));
        }
        self.grace_period()?;
        Ok(())
    }

    /// Replace the directory URL and login given on the command line.
    pub fn apply_overrides(&mut self, server: Option<&str>, login: Option<&str>) {
        if let Some(server) = server {
            self.directory.url = server.to_string();
        }
        if let Some(login) = login {
            self.directory.login = login.to_string();
        }
    }

    /// Daemon shutdown grace period.
    pub fn grace_period(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.daemon.grace_period).map_err(|e| {
            ConfigError::InvalidValue {
                key: "daemon.grace_period",
                reason: e.to_string(),
            }
        })
    }

    /// Every configured group specifier, valid first, blanks removed.
    #[must_use]
    pub fn all_group_specs(&self) -> Vec<&str> {
        self.sync
            .groups
            .iter()
            .chain(&self.sync.restricted_groups)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Join an absolute or relative configured path under an install prefix.
#[must_use]
pub fn under_prefix(prefix: &Path, path: &Path) -> std::path::PathBuf {
    let relative = path.strip_prefix("/").unwrap_or(path);
    prefix.join(relative)
}
