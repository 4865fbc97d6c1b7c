// Allow panic/unwrap/expect in tests (denied globally via Cargo.toml lints)
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        clippy::arithmetic_side_effects,
        clippy::indexing_slicing
    )
)]

pub mod accounts;
pub mod authconfig;
pub mod config;
pub mod daemon;
pub mod directory;
pub mod info;
pub mod logging;
pub mod nssdb;
pub mod pipeline;
pub mod privilege;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, SyncConfig, DEFAULT_CONFIG_PATH};
pub use directory::{AccountDirectory, DirectorySnapshot, RemoteGroup, RemoteUser};
pub use pipeline::{InstallOptions, Pipeline, PipelineError, SyncReport};
pub use resolver::{resolve, Privilege, ResolvedAccount, ResolvedAccounts};
