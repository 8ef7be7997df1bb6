// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use outpost_adapters::{FakeJobBackend, FakeMetricsSink, FakeSecretProvider};
use outpost_engine::RuntimeDeps;
use tempfile::tempdir;

fn deps() -> RuntimeDeps {
    RuntimeDeps {
        backend: Arc::new(FakeJobBackend::new()),
        secrets: Arc::new(FakeSecretProvider::new()),
        metrics: Arc::new(FakeMetricsSink::new()),
    }
}

#[yare::parameterized(
    socket  = { |c: &Config| c.socket_path.clone(),  "daemon.sock" },
    lock    = { |c: &Config| c.lock_path.clone(),    "daemon.pid" },
    version = { |c: &Config| c.version_path.clone(), "daemon.version" },
    log     = { |c: &Config| c.log_path.clone(),     "daemon.log" },
)]
fn runtime_files_live_under_state_dir(path: fn(&Config) -> PathBuf, name: &str) {
    let config = Config::in_dir(PathBuf::from("/var/lib/outpost"));
    assert_eq!(path(&config), PathBuf::from("/var/lib/outpost").join(name));
    assert!(config.tcp_port.is_none());
}

#[tokio::test]
async fn startup_writes_runtime_files_and_shutdown_removes_them() {
    let dir = tempdir().unwrap();
    let config = Config::in_dir(dir.path().join("state"));

    let mut result = startup(&config, deps(), None, CancellationToken::new()).await.unwrap();
    assert!(config.socket_path.exists());
    assert!(config.version_path.exists());
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());

    result.daemon.shutdown().unwrap();
    assert!(result.daemon.shutdown.is_cancelled());
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());
}

#[tokio::test]
async fn second_daemon_fails_on_lock_and_leaves_files_alone() {
    let dir = tempdir().unwrap();
    let config = Config::in_dir(dir.path().to_path_buf());

    let _first = startup(&config, deps(), None, CancellationToken::new()).await.unwrap();
    let second = startup(&config, deps(), None, CancellationToken::new()).await;

    assert!(matches!(second, Err(LifecycleError::LockFailed(_))));
    assert!(config.socket_path.exists());
    assert!(config.lock_path.exists());
}

#[tokio::test]
async fn tcp_without_token_is_refused_and_cleaned_up() {
    let dir = tempdir().unwrap();
    let mut config = Config::in_dir(dir.path().to_path_buf());
    config.tcp_port = Some(0);

    let result = startup(&config, deps(), None, CancellationToken::new()).await;

    assert!(matches!(result, Err(LifecycleError::MissingAuthToken)));
    assert!(!config.lock_path.exists());
    assert!(!config.socket_path.exists());
}
