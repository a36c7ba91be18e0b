// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! WebSocket transport (tokio-tungstenite, rustls for `wss://`)

use super::transport::{Connection, Connector};
use crate::error::SourceError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

/// Connector opening WebSocket client connections
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, url: &str) -> Result<WsConnection, SourceError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(WsConnection { stream })
    }
}

/// Open WebSocket connection carrying text frames
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, SourceError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(other) => {
                    // Ping/pong are answered by tungstenite itself.
                    trace!(kind = ?other, "Skipping non-text frame");
                }
                Err(e) => return Some(Err(SourceError::Transport(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SourceError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
