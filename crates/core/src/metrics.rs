// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics snapshot shared between the engine and the wire crate.

use serde::{Deserialize, Serialize};

/// Point-in-time view of the agent's counters and gauges, returned by the
/// health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub drift_detected: u64,
    pub log_chunks_dropped: u64,
    pub active_jobs: u64,
    pub active_stream_sessions: u64,
}
