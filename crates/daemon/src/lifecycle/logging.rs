// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use super::LifecycleError;

/// Install the global subscriber writing to `log_path` through a
/// non-blocking appender. `RUST_LOG` overrides the default `info` filter.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the writer thread.
pub fn init_logging(log_path: &Path) -> Result<WorkerGuard, LifecycleError> {
    let dir = log_path
        .parent()
        .ok_or_else(|| LifecycleError::Logging(format!("no parent for {}", log_path.display())))?;
    let file_name = log_path
        .file_name()
        .ok_or_else(|| LifecycleError::Logging(format!("no file name in {}", log_path.display())))?;
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| LifecycleError::Logging(e.to_string()))?;
    Ok(guard)
}
