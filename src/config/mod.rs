//! Configuration file schema and loader.

mod io;
mod types;

pub use io::{load_config, parse_config, read_config, under_prefix, DEFAULT_CONFIG_PATH};
pub use types::{
    AuthSection, ConfigError, DaemonSection, DirectoryConfig, LoggingSection, NssSection,
    SyncConfig, SyncSection, UsersSection,
};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
