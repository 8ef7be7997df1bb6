// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outpost daemon library
//!
//! Process lifecycle, the admin socket listener, and the control-plane
//! WebSocket transport. The `outpostd` binary wires them together.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod transport;

pub use lifecycle::{Config, DaemonState, LifecycleError};
pub use listener::{ListenCtx, Listener};
pub use transport::WsTransport;
