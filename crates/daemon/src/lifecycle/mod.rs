// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, logging, shutdown.

mod logging;
mod startup;
pub use logging::init_logging;
pub use startup::startup;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use outpost_core::SystemClock;
use outpost_engine::{EngineConfig, Runtime};
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Daemon runtime with the production clock
pub type DaemonRuntime = Runtime<SystemClock>;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/outpost)
    pub state_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    pub tcp_port: Option<u16>,
    pub auth_token: Option<String>,
    pub ipc_timeout: Duration,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let mut config = Self::in_dir(crate::env::state_dir()?);
        config.tcp_port = crate::env::tcp_port();
        config.auth_token = crate::env::auth_token();
        config.ipc_timeout = crate::env::ipc_timeout();
        config.engine = crate::env::engine_config();
        Ok(config)
    }

    /// Default configuration rooted at `state_dir`.
    pub fn in_dir(state_dir: PathBuf) -> Self {
        Self {
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            state_dir,
            tcp_port: None,
            auth_token: None,
            ipc_timeout: Duration::from_secs(5),
            engine: EngineConfig::default(),
        }
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub runtime: Arc<DaemonRuntime>,
    /// Cancelled to stop every engine task and the listener
    pub shutdown: CancellationToken,
}

/// Result of daemon startup: the daemon state plus the bound sockets.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub unix: UnixListener,
    pub tcp: Option<TcpListener>,
}

impl DaemonState {
    /// Stop engine tasks and remove the runtime files.
    ///
    /// Running workloads are left to the backend; their records are lost
    /// with the process.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");
        self.shutdown.cancel();

        for path in [&self.config.socket_path, &self.config.lock_path, &self.config.version_path] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove runtime file");
                }
            }
        }

        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Failed to bind TCP port {0}: {1}")]
    TcpBindFailed(u16, std::io::Error),

    #[error("TCP admin port requires OUTPOST_AUTH_TOKEN")]
    MissingAuthToken,

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Kubernetes client error: {0}")]
    Kubernetes(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
