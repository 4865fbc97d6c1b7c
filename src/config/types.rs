use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required config key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// `[directory]`: where remote account data comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    pub url: String,
    pub login: String,
    pub password: String,
    /// Bearer token; takes precedence over `password` when set.
    pub token: Option<String>,
    /// JSON snapshot file used instead of the HTTP service.
    pub snapshot: Option<PathBuf>,
}

/// `[sync]`: which groups to provision and where run state lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub temp_dir: PathBuf,
    pub mode_file: PathBuf,
    pub agreement_group: String,
    pub agreement_group_prefix: String,
    /// Remote users and groups below this id are never provisioned.
    pub min_id: u32,
    pub groups: Vec<String>,
    pub restricted_groups: Vec<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("/var/lib/acctsync/tmp"),
            mode_file: PathBuf::from("/var/lib/acctsync/modes.json"),
            agreement_group: "cla_done".to_string(),
            agreement_group_prefix: "cla_".to_string(),
            min_id: 1000,
            groups: Vec::new(),
            restricted_groups: Vec::new(),
        }
    }
}

/// `[users]`: shape of provisioned local accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UsersSection {
    pub home: PathBuf,
    pub skeleton: PathBuf,
    pub default_shell: String,
    pub restricted_shell: String,
    pub restricted_ssh_command: String,
    pub restricted_ssh_options: String,
    pub admin_ssh_command: Option<String>,
    pub admin_ssh_options: Option<String>,
}

impl Default for UsersSection {
    fn default() -> Self {
        Self {
            home: PathBuf::from("/home"),
            skeleton: PathBuf::from("/etc/skel"),
            default_shell: "/bin/bash".to_string(),
            restricted_shell: "/sbin/nologin".to_string(),
            restricted_ssh_command: String::new(),
            restricted_ssh_options: String::new(),
            admin_ssh_command: None,
            admin_ssh_options: None,
        }
    }
}

/// `[nss]`: database compiler and install location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NssSection {
    pub makedb: PathBuf,
    /// Relative to the install prefix.
    pub db_dir: PathBuf,
}

impl Default for NssSection {
    fn default() -> Self {
        Self {
            makedb: PathBuf::from("/usr/bin/makedb"),
            db_dir: PathBuf::from("var/db"),
        }
    }
}

/// `[auth]`: system authentication configuration toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Relative to the install prefix.
    pub file: PathBuf,
    pub key: String,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            file: PathBuf::from("etc/sysconfig/authconfig"),
            key: "USEDB".to_string(),
            program: "authconfig".to_string(),
            args: vec!["--updateall".to_string()],
        }
    }
}

/// `[daemon]`: change-event listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSection {
    /// Program and arguments printing one JSON bus event per line.
    pub command: Vec<String>,
    /// Humantime duration, e.g. `1s` or `500ms`.
    pub grace_period: String,
    pub group_topic: String,
    pub user_topic: String,
    pub watched_fields: Vec<String>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            command: vec!["fedmsg-tail".to_string(), "--json".to_string()],
            grace_period: "1s".to_string(),
            group_topic: r"group\.member\.sponsor".to_string(),
            user_topic: r"user\.update".to_string(),
            watched_fields: vec![
                "ssh_key".to_string(),
                "password".to_string(),
                "human_name".to_string(),
            ],
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub rotation: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// Top-level configuration, deserialized from the TOML file.
///
/// Every section is optional at the TOML level and resolves to its `Default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub directory: DirectoryConfig,
    pub sync: SyncSection,
    pub users: UsersSection,
    pub nss: NssSection,
    pub auth: AuthSection,
    pub daemon: DaemonSection,
    pub logging: LoggingSection,
}
