// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use outpost_core::SystemClock;
use outpost_engine::{Runtime, RuntimeDeps, Transport};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Config, DaemonState, LifecycleError, StartupResult};

/// Start the daemon
pub async fn startup(
    config: &Config,
    deps: RuntimeDeps,
    transport: Option<Arc<dyn Transport>>,
    shutdown: CancellationToken,
) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config, deps, transport, shutdown).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Lock failure: the files belong to the running daemon
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(
    config: &Config,
    deps: RuntimeDeps,
    transport: Option<Arc<dyn Transport>>,
    shutdown: CancellationToken,
) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directory (needed for socket, lock, etc.)
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    // Open without truncating so a running daemon's PID survives a failed attempt.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    if config.tcp_port.is_some() && config.auth_token.is_none() {
        return Err(LifecycleError::MissingAuthToken);
    }

    // 3. Remove stale socket and bind
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let unix = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;
    let tcp = match config.tcp_port {
        Some(port) => Some(
            TcpListener::bind(("0.0.0.0", port))
                .await
                .map_err(|e| LifecycleError::TcpBindFailed(port, e))?,
        ),
        None => None,
    };

    // 4. Start the engine (LAST - only after all validation passes)
    let runtime = Arc::new(Runtime::start(
        deps,
        SystemClock,
        config.engine.clone(),
        transport,
        shutdown.clone(),
    ));

    info!(
        socket = %config.socket_path.display(),
        tcp_port = ?config.tcp_port,
        "daemon started"
    );

    Ok(StartupResult {
        daemon: DaemonState { config: config.clone(), lock_file, runtime, shutdown },
        unix,
        tcp,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    for path in [&config.socket_path, &config.version_path, &config.lock_path] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}
