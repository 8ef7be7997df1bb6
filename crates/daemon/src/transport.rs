// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport for the control-plane stream.
//!
//! Each connect opens a fresh socket and splits it into two pumps: frames
//! from the session are serialized as JSON text messages, and text messages
//! from the peer are parsed into [`ControlFrame`]s. Dropping the
//! [`Connection`] closes the socket.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use outpost_engine::{ChannelError, Connection, Transport};
use outpost_wire::{AgentFrame, ControlFrame};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_CAPACITY: usize = 256;

/// Dials `ws://` or `wss://` control-plane endpoints.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    token: Option<String>,
    capacity: usize,
}

impl WsTransport {
    /// `token`, when set, is sent as a bearer `Authorization` header.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self { url: url.into(), token, capacity: DEFAULT_CAPACITY }
    }

    /// Frames buffered in each direction.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(format!("{}: {e}", self.url)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ChannelError::Connect(format!("invalid auth token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {e}", self.url)))?;
        tracing::debug!(url = %self.url, "websocket connected");

        let (sink, stream) = ws.split();
        let (agent_tx, agent_rx) = mpsc::channel(self.capacity);
        let (control_tx, control_rx) = mpsc::channel(self.capacity);
        tokio::spawn(send_pump(sink, agent_rx));
        tokio::spawn(recv_pump(stream, control_tx));
        Ok(Connection { tx: agent_tx, rx: control_rx })
    }
}

async fn send_pump<S>(mut sink: S, mut rx: mpsc::Receiver<AgentFrame>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode agent frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(error = %e, "websocket send failed");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn recv_pump<S, E>(mut stream: S, tx: mpsc::Sender<ControlFrame>)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ControlFrame>(&text) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed control frame ignored"),
            },
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "websocket closed by peer");
                return;
            }
            Ok(_) => {} // Ping/Pong/Binary
            Err(e) => {
                tracing::warn!(error = %e, "websocket read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
