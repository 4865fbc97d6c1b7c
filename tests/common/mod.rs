//! Common test utilities

use acctsync::config::{parse_config, SyncConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub use acctsync::testing::{CopyCompiler, RecordingHost};

/// Host where every path starts out superuser-owned and the given local
/// accounts exist.
pub fn fresh_host(accounts: &[(&str, u32)]) -> RecordingHost {
    RecordingHost::default()
        .superuser_owned()
        .with_accounts(accounts)
}

/// Scratch layout for one end-to-end run.
pub struct Fixture {
    pub root: TempDir,
    pub snapshot_path: PathBuf,
    pub config: SyncConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp directory");
        let skeleton = root.path().join("skel");
        std::fs::create_dir_all(&skeleton).expect("skeleton");
        std::fs::write(skeleton.join(".bashrc"), "# bashrc\n").expect("bashrc");

        let snapshot_path = root.path().join("snapshot.json");
        let state = root.path().join("state");
        let config = parse_config(&format!(
            r#"
[directory]
snapshot = "{snapshot}"

[sync]
temp_dir = "{state}/tmp"
mode_file = "{state}/modes.json"
agreement_group = "cla_done"
min_id = 100
groups = ["@git"]
restricted_groups = ["docs"]

[users]
home = "/home"
skeleton = "{skeleton}"
restricted_shell = "/sbin/nologin"
restricted_ssh_command = "/usr/local/bin/restricted"
restricted_ssh_options = "no-pty"
"#,
            snapshot = snapshot_path.display(),
            state = state.display(),
            skeleton = skeleton.display(),
        ))
        .expect("valid config");

        let fixture = Self {
            root,
            snapshot_path,
            config,
        };
        fixture.write_snapshot(&[101, 102]);
        fixture
    }

    pub fn prefix(&self) -> &Path {
        self.root.path()
    }

    pub fn home(&self, name: &str) -> PathBuf {
        self.root.path().join("home").join(name)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.path().join("var/db")
    }

    /// alice (101), bob (102) and carol (103) have all signed the agreement;
    /// `packagers` is a git group holding `packagers`, carol is in `docs`.
    pub fn write_snapshot(&self, packagers: &[u32]) {
        let doc = json!({
            "users": [
                {"id": 101, "username": "alice", "human_name": "Alice Example",
                 "password": "$6$alice", "ssh_key": "ssh-ed25519 AAAAalice alice@laptop"},
                {"id": 102, "username": "bob", "human_name": "Bob Example",
                 "password": "$6$bob"},
                {"id": 103, "username": "carol", "human_name": "Carol Example",
                 "password": "$6$carol", "ssh_key": "ssh-ed25519 AAAAcarol"}
            ],
            "groups": [
                {"id": 300, "name": "cla_done", "type": "cla", "users": [101, 102, 103]},
                {"id": 301, "name": "packagers", "type": "git", "users": packagers},
                {"id": 302, "name": "docs", "type": "tracking", "users": [103]},
                {"id": 303, "name": "empty", "type": "git"}
            ]
        });
        std::fs::write(&self.snapshot_path, doc.to_string()).expect("write snapshot");
    }
}
