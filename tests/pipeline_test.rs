mod common;

use acctsync::accounts::ModeCache;
use acctsync::pipeline::{InstallOptions, Pipeline, PipelineError};
use acctsync::directory::SnapshotFile;
use common::{fresh_host, CopyCompiler, Fixture, RecordingHost};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

fn pipeline(fixture: &Fixture, host: Arc<RecordingHost>, compiler: CopyCompiler) -> Pipeline {
    Pipeline::new(
        Arc::new(fixture.config.clone()),
        Arc::new(SnapshotFile::new(fixture.snapshot_path.clone())),
        Arc::new(compiler),
        host,
    )
}

fn options(fixture: &Fixture) -> InstallOptions {
    InstallOptions {
        prefix: fixture.prefix().to_path_buf(),
        ..InstallOptions::default()
    }
}

fn mode(path: &std::path::Path) -> u32 {
    fs::metadata(path).expect("metadata").permissions().mode() & 0o7777
}

fn all_accounts() -> Arc<RecordingHost> {
    Arc::new(fresh_host(&[("alice", 101), ("bob", 102), ("carol", 103)]))
}

#[tokio::test]
async fn test_install_provisions_everything_under_prefix() {
    let fixture = Fixture::new();
    let host = all_accounts();
    let pipeline = pipeline(&fixture, Arc::clone(&host), CopyCompiler::default());

    let report = pipeline.run(&options(&fixture)).await.expect("run");

    assert_eq!(report.accounts, 3);
    assert_eq!(report.installed.len(), 3);

    let db_dir = fixture.db_dir();
    let passwd = fs::read_to_string(db_dir.join("passwd.db")).expect("passwd.db");
    assert!(passwd.contains("=101 alice:x:101:101:Alice Example:/home/alice:/bin/bash\n"));
    assert!(passwd.contains(".carol carol:x:103:103:Carol Example:/home/carol:/sbin/nologin\n"));
    assert_eq!(mode(&db_dir.join("shadow.db")), 0o600);
    let shadow = fs::read_to_string(db_dir.join("shadow.db")).expect("shadow.db");
    assert!(shadow.contains("=102 bob:$6$bob::::7:::\n"));

    let group = fs::read_to_string(db_dir.join("group.db")).expect("group.db");
    assert!(group.contains(".packagers packagers:x:301:alice,bob\n"));
    assert!(group.contains("05 packagers:x:301:alice,bob\n"));
    assert!(!group.contains("empty"));

    assert!(fixture.home("alice").join(".bashrc").exists());
    assert_eq!(host.recorded_owner(&fixture.home("alice")), Some(101));

    let alice_keys =
        fs::read_to_string(fixture.home("alice").join(".ssh/authorized_keys")).expect("alice keys");
    assert_eq!(alice_keys, "ssh-ed25519 AAAAalice alice@laptop\n");
    let carol_keys =
        fs::read_to_string(fixture.home("carol").join(".ssh/authorized_keys")).expect("carol keys");
    assert_eq!(
        carol_keys,
        "command=\"/usr/local/bin/restricted\",no-pty ssh-ed25519 AAAAcarol\n"
    );
    assert!(!fixture.home("bob").join(".ssh/authorized_keys").exists());

    let auth = fs::read_to_string(fixture.prefix().join("etc/sysconfig/authconfig")).expect("auth");
    assert_eq!(auth, "USEDB=yes\n");
}

#[tokio::test]
async fn test_removed_account_is_locked_and_restored_on_return() {
    let fixture = Fixture::new();
    let host = all_accounts();
    let pipeline = pipeline(&fixture, Arc::clone(&host), CopyCompiler::default());
    let alice_home = fixture.home("alice");

    pipeline.run(&options(&fixture)).await.expect("first run");
    fs::set_permissions(&alice_home, fs::Permissions::from_mode(0o750)).expect("chmod");

    fixture.write_snapshot(&[102]);
    let report = pipeline.run(&options(&fixture)).await.expect("second run");
    assert_eq!(report.locked_homes.get("alice"), Some(&0o750));
    assert_eq!(mode(&alice_home), 0o700);
    assert_eq!(host.recorded_owner(&alice_home), Some(0));
    let cache = ModeCache::load(&fixture.config.sync.mode_file).await;
    assert_eq!(cache.get("alice"), Some(0o750));

    fixture.write_snapshot(&[101, 102]);
    let report = pipeline.run(&options(&fixture)).await.expect("third run");
    assert_eq!(
        report.homes.expect("homes").restored,
        vec!["alice".to_string()]
    );
    assert_eq!(mode(&alice_home), 0o750);
    assert_eq!(host.recorded_owner(&alice_home), Some(101));
}

#[tokio::test]
async fn test_compile_failure_installs_nothing() {
    let fixture = Fixture::new();
    let db_dir = fixture.db_dir();
    fs::create_dir_all(&db_dir).expect("db dir");
    fs::write(db_dir.join("passwd.db"), "previous").expect("old passwd");
    let compiler = CopyCompiler::failing_on("group.txt");
    let pipeline = pipeline(&fixture, all_accounts(), compiler);

    let result = pipeline.run(&options(&fixture)).await;

    assert!(matches!(result, Err(PipelineError::NssDb(_))));
    assert_eq!(fs::read_to_string(db_dir.join("passwd.db")).expect("passwd"), "previous");
    assert!(!db_dir.join("group.db").exists());
    assert!(!db_dir.join("shadow.db").exists());
    assert!(!fixture.home("alice").exists(), "no later stage may run");
}

#[tokio::test]
async fn test_disabled_stages_are_skipped() {
    let fixture = Fixture::new();
    let pipeline = pipeline(&fixture, all_accounts(), CopyCompiler::default());
    let options = InstallOptions {
        homes: false,
        ssh_keys: false,
        passwords: false,
        shadow: false,
        local_auth: None,
        ..options(&fixture)
    };

    let report = pipeline.run(&options).await.expect("run");

    assert_eq!(report.installed, vec![fixture.db_dir().join("group.db")]);
    assert!(report.homes.is_none());
    assert!(report.keys.is_none());
    assert!(!fixture.home("alice").exists());
    assert!(!fixture.prefix().join("etc/sysconfig/authconfig").exists());
}

#[tokio::test]
async fn test_missing_agreement_group_is_fatal() {
    let mut fixture = Fixture::new();
    fixture.config.sync.agreement_group = "cla_missing".to_string();
    let pipeline = pipeline(&fixture, all_accounts(), CopyCompiler::default());

    let result = pipeline.run(&options(&fixture)).await;

    assert!(matches!(result, Err(PipelineError::Resolve(_))));
    assert!(!fixture.db_dir().exists());
}

#[tokio::test]
async fn test_working_directories_are_discarded() {
    let fixture = Fixture::new();
    let pipeline = pipeline(&fixture, all_accounts(), CopyCompiler::default());

    pipeline.run(&options(&fixture)).await.expect("run");

    let leftovers: Vec<_> = fs::read_dir(&fixture.config.sync.temp_dir)
        .expect("temp dir")
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_unsafe_and_system_identities_are_never_provisioned() {
    let mut fixture = Fixture::new();
    fixture.config.sync.min_id = 102;
    let doc = serde_json::json!({
        "users": [
            {"id": 101, "username": "alice"},
            {"id": 102, "username": "bob"},
            {"id": 104, "username": "../victim"},
            {"id": 105, "username": "eve:x:0:0:"}
        ],
        "groups": [
            {"id": 300, "name": "cla_done", "type": "cla", "users": [101, 102, 104, 105]},
            {"id": 301, "name": "packagers", "type": "git", "users": [101, 102, 104, 105]}
        ]
    });
    fs::write(&fixture.snapshot_path, doc.to_string()).expect("snapshot");
    let victim = fixture.prefix().join("victim");
    fs::create_dir_all(&victim).expect("victim");
    fs::set_permissions(&victim, fs::Permissions::from_mode(0o700)).expect("chmod");
    let host = all_accounts();
    let pipeline = pipeline(&fixture, Arc::clone(&host), CopyCompiler::default());

    let report = pipeline.run(&options(&fixture)).await.expect("run");

    assert_eq!(report.accounts, 1);
    let passwd = fs::read_to_string(fixture.db_dir().join("passwd.db")).expect("passwd.db");
    assert_eq!(passwd.lines().count(), 3);
    assert!(passwd.contains(".bob bob:x:102:102:"));
    assert!(!fixture.home("alice").exists());
    assert_eq!(mode(&victim), 0o700);
    assert!(host.recorded_owner(&victim).is_none());
}
