// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine tuning knobs with their defaults.

use crate::session::SessionConfig;
use outpost_core::SpecLimits;
use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }
}

/// Drift loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftConfig {
    /// Default tick jitter; deployments may override it.
    pub jitter: Duration,
    /// A check still running after this long is cancelled and recorded as
    /// `check-failed`.
    pub check_timeout: Duration,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self { jitter: Duration::from_secs(5), check_timeout: Duration::from_secs(15 * 60) }
    }
}

/// Reaper settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Delay between a job turning terminal and its cleanup.
    pub grace: Duration,
    pub retry: Backoff,
    /// Cleanup attempts before a job is flagged for manual intervention.
    pub max_attempts: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10 * 60),
            retry: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
            max_attempts: 5,
        }
    }
}

/// Everything the engine needs besides its adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum concurrently running jobs.
    pub concurrency: usize,
    /// Maximum admitted-but-not-running jobs before `submit` fails fast.
    pub queue_ceiling: usize,
    pub limits: SpecLimits,
    pub submit_timeout: Duration,
    /// How long a running job's backend cancellation may take before the
    /// job is forced to `cancelled`.
    pub cancel_grace: Duration,
    pub drift: DriftConfig,
    pub reaper: ReaperConfig,
    pub session: SessionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_ceiling: 256,
            limits: SpecLimits::default(),
            submit_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(30),
            drift: DriftConfig::default(),
            reaper: ReaperConfig::default(),
            session: SessionConfig::default(),
        }
    }
}
