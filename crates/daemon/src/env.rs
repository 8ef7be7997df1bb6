// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use outpost_adapters::KubernetesConfig;
use outpost_engine::EngineConfig;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: OUTPOST_STATE_DIR > XDG_STATE_HOME/outpost > ~/.local/state/outpost
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("OUTPOST_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("outpost"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/outpost"))
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn millis(name: &str) -> Option<Duration> {
    parsed::<u64>(name).map(Duration::from_millis)
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Default IPC timeout
pub fn ipc_timeout() -> Duration {
    millis("OUTPOST_IPC_TIMEOUT_MS").unwrap_or(Duration::from_secs(5))
}

/// TCP port for remote admin connections, in addition to the Unix socket.
pub fn tcp_port() -> Option<u16> {
    parsed("OUTPOST_TCP_PORT")
}

/// Shared secret for TCP admin connections and the control-plane channel.
pub fn auth_token() -> Option<String> {
    non_empty("OUTPOST_AUTH_TOKEN")
}

/// WebSocket URL of the control plane. Unset runs the agent standalone.
pub fn control_url() -> Option<String> {
    non_empty("OUTPOST_CONTROL_URL")
}

/// Bearer token presented to the control plane.
pub fn control_token() -> Option<String> {
    non_empty("OUTPOST_CONTROL_TOKEN")
}

pub fn agent_id() -> String {
    non_empty("OUTPOST_AGENT_ID").unwrap_or_else(|| "outpost".to_string())
}

/// Engine settings, each overridable by its own variable.
pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(n) = parsed::<usize>("OUTPOST_CONCURRENCY").filter(|n| *n > 0) {
        config.concurrency = n;
    }
    if let Some(n) = parsed("OUTPOST_QUEUE_CEILING") {
        config.queue_ceiling = n;
    }
    if let Some(d) = millis("OUTPOST_SUBMIT_TIMEOUT_MS") {
        config.submit_timeout = d;
    }
    if let Some(d) = millis("OUTPOST_CANCEL_GRACE_MS") {
        config.cancel_grace = d;
    }
    if let Some(d) = millis("OUTPOST_REAP_GRACE_MS") {
        config.reaper.grace = d;
    }
    if let Some(d) = millis("OUTPOST_DRIFT_JITTER_MS") {
        config.drift.jitter = d;
    }
    if let Some(d) = millis("OUTPOST_DRIFT_TIMEOUT_MS") {
        config.drift.check_timeout = d;
    }
    if let Some(n) = parsed::<usize>("OUTPOST_REPLAY_BUFFER").filter(|n| *n > 0) {
        config.session.replay_capacity = n;
        // Logs pause once the buffer is three quarters full
        config.session.log_high_water = (n * 3 / 4).max(1);
    }
    config.session.agent_id = agent_id();
    config
}

pub fn kube_config() -> KubernetesConfig {
    let mut config = KubernetesConfig::default();
    if let Some(ns) = non_empty("OUTPOST_K8S_NAMESPACE") {
        config.namespace = ns;
    }
    if let Some(image) = non_empty("OUTPOST_K8S_IMAGE") {
        config.image = image;
    }
    config
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
