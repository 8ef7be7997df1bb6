// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocols spoken by the outpost agent.
//!
//! - Administrative surface: 4-byte length prefix (big-endian) + JSON payload
//! - Control-plane channel: one JSON frame per WebSocket text message

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod request;
mod response;
mod stream;
mod types;
mod wire;

pub use request::Request;
pub use response::{ErrorKind, Response};
pub use stream::{AgentFrame, CommandKind, ControlFrame, OperatorCommand, OutboundEvent, Sequenced};
pub use types::{
    CancelOutcome, DeploymentDetail, HealthDetail, JobDetail, JobSummary, Pressure, StreamHealth,
};
pub use wire::{call, decode, encode, read_message, write_message, ProtocolError};
pub use wire::{read_request, write_response, MAX_MESSAGE_SIZE};

/// Protocol version exchanged in `Hello`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");
