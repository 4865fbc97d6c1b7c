//! Local account provisioning: flat-file records, home directories and SSH keys.

pub mod homes;
pub mod host;
pub mod layout;
pub mod mode_cache;
pub mod records;
pub mod ssh;

pub use homes::{
    create_home_directories, lock_home_directory, lock_stale_home_directories, HomeError, HomeReport,
    DEFAULT_HOME_MODE, LOCKED_MODE,
};
pub use host::{Host, LocalAccount, ProvisionError, SystemHost, ROOT_UID};
pub use layout::HomeLayout;
pub use mode_cache::ModeCache;
pub use records::{
    group_records, password_records, write_group_records, write_password_records, PasswordRecords,
};
pub use ssh::{authorized_keys_content, provision_ssh_keys, write_ssh_key, KeyOutcome, KeyReport};
