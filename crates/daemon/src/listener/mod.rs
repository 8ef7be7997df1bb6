// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Administrative socket listener.
//!
//! Accepts connections on the Unix socket and, when configured, on TCP.
//! Each connection is served on its own task: length-prefixed JSON requests
//! in, one response per request out, until the client hangs up.

mod handlers;

use std::sync::Arc;
use std::time::Duration;

use outpost_core::Clock;
use outpost_engine::Runtime;
use outpost_wire::{self as wire, ErrorKind, ProtocolError, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared context for all request handlers.
pub struct ListenCtx<C: Clock> {
    pub runtime: Arc<Runtime<C>>,
    /// Cancelled by a `Shutdown` request
    pub shutdown: CancellationToken,
    /// TCP clients must present this token in `Hello`.
    pub auth_token: Option<String>,
    pub ipc_timeout: Duration,
}

/// Listener task for accepting socket connections.
pub struct Listener<C: Clock> {
    unix: UnixListener,
    tcp: Option<TcpListener>,
    ctx: Arc<ListenCtx<C>>,
}

/// Source of a connection (for auth decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionSource {
    /// Local Unix socket, trusted.
    Unix,
    /// Remote TCP, must authenticate with `Hello`.
    Tcp,
}

impl<C: Clock> Listener<C> {
    pub fn new(unix: UnixListener, tcp: Option<TcpListener>, ctx: Arc<ListenCtx<C>>) -> Self {
        Self { unix, tcp, ctx }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.unix.accept() => match result {
                    Ok((stream, _)) => self.spawn(stream, ConnectionSource::Unix),
                    Err(e) => error!(error = %e, "unix accept error"),
                },
                result = accept_tcp(self.tcp.as_ref()) => match result {
                    Ok((stream, addr)) => {
                        debug!(%addr, "tcp connection");
                        self.spawn(stream, ConnectionSource::Tcp);
                    }
                    Err(e) => error!(error = %e, "tcp accept error"),
                },
            }
        }
        info!("listener stopped");
    }

    fn spawn<S>(&self, stream: S, source: ConnectionSource)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, source, &ctx).await {
                log_connection_error(e);
            }
        });
    }
}

async fn accept_tcp(
    tcp: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match tcp {
        Some(tcp) => tcp.accept().await,
        None => std::future::pending().await,
    }
}

fn log_connection_error(e: ProtocolError) {
    match e {
        ProtocolError::ConnectionClosed => debug!("client disconnected"),
        ProtocolError::Timeout => debug!("idle connection timed out"),
        _ => warn!(error = %e, "connection error"),
    }
}

/// Serve requests on one connection until the client closes it.
async fn handle_connection<S, C>(
    mut stream: S,
    source: ConnectionSource,
    ctx: &ListenCtx<C>,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Clock,
{
    let mut authenticated = source == ConnectionSource::Unix;
    loop {
        let request = match wire::read_request(&mut stream, ctx.ipc_timeout).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        // TCP connections must authenticate via Hello before anything else
        if !authenticated {
            match &request {
                Request::Hello { token, .. } if token_matches(token.as_deref(), ctx) => {
                    authenticated = true;
                }
                _ => {
                    warn!(request = request.name(), "unauthenticated tcp request rejected");
                    let response = Response::error(ErrorKind::Unauthorized, "unauthorized");
                    wire::write_response(&mut stream, &response, ctx.ipc_timeout).await?;
                    return Ok(());
                }
            }
        }

        if matches!(
            request,
            Request::HealthCheck
                | Request::GetJob { .. }
                | Request::GetJobLogs { .. }
                | Request::ListJobs { .. }
        ) {
            debug!(request = request.name(), "received query");
        } else {
            info!(request = request.name(), "received request");
        }

        let response = handlers::handle_request(request, ctx).await;
        debug!(?response, "sending response");
        wire::write_response(&mut stream, &response, ctx.ipc_timeout).await?;
    }
}

fn token_matches<C: Clock>(provided: Option<&str>, ctx: &ListenCtx<C>) -> bool {
    match (&ctx.auth_token, provided) {
        (Some(expected), Some(provided)) => expected == provided,
        // Startup refuses a TCP port without a token; treat it as closed
        (None, _) => false,
        (Some(_), None) => false,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
