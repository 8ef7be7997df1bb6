// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! outpost-engine: job orchestration for the outpost agent
//!
//! ```text
//!  admin / control plane ──► Scheduler ──► JobBackend
//!          ▲                   │  ▲
//!          │          terminal │  │ plan-only submit
//!          │                   ▼  │
//!   StreamSession ◄── Publisher ◄─ DriftLoop
//!                              ◄─ Reaper (teardown, release, remove)
//! ```

mod config;
mod error;
mod metrics;
mod reaper;
mod registry;
mod runtime;
mod scheduler;
pub mod session;
mod tokens;
mod drift;

#[cfg(test)]
mod test_helpers;

pub use config::{Backoff, DriftConfig, EngineConfig, ReaperConfig};
pub use drift::DriftLoop;
pub use error::EngineError;
pub use metrics::Metrics;
pub use reaper::{CleanupOutcome, Reaper};
pub use registry::JobRegistry;
pub use runtime::{CommandRouter, Runtime, RuntimeDeps};
pub use scheduler::{Scheduler, SchedulerStats, TerminalNotice};
pub use session::{
    ChannelError, CommandHandler, Connection, Publisher, SessionConfig, StreamSession, Transport,
};
pub use tokens::{Token, TokenPool};
