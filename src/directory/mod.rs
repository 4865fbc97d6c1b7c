//! Remote account directory: data model and fetch boundary.

mod client;
mod types;

pub use client::{
    directory_from_config, AccountDirectory, Credentials, HttpDirectory, SnapshotDocument, SnapshotFile,
};
pub use types::{AccountStatus, DirectoryError, DirectorySnapshot, Gid, RemoteGroup, RemoteUser, Uid};
