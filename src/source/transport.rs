// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Transport abstraction for text-message sources

use crate::error::SourceError;
use async_trait::async_trait;

/// Opens text-message connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Conn: Connection;

    /// Whether this platform can open connections at all
    fn is_available(&self) -> bool {
        true
    }

    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<Self::Conn, SourceError>;
}

/// An open, bidirectional text-message connection
#[async_trait]
pub trait Connection: Send + 'static {
    /// Next inbound text message
    ///
    /// Returns None once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, SourceError>>;

    /// Send one text message
    async fn send(&mut self, text: String) -> Result<(), SourceError>;

    /// Close the connection
    async fn close(&mut self);
}
