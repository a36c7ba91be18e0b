// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Metrics source port
//!
//! Anything that can emit [`MetricsSample`]s and report connection health
//! implements [`MetricsSource`]. Two adapters ship with the crate:
//!
//! - [`SimulatedSource`]: WebSocket client of the telemetry simulator, with
//!   timeout, linear-backoff reconnect and schema validation
//! - [`HardwareSource`]: placeholder for a headset adapter
//!
//! The controller depends only on the trait and holds adapters as
//! `Arc<dyn MetricsSource>`.

pub mod hardware;
pub mod simulated;
pub mod transport;
pub mod websocket;

use crate::error::SourceError;
use crate::protocol::MetricsSample;
use crate::registry::Callback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use hardware::HardwareSource;
pub use simulated::SimulatedSource;
pub use transport::{Connection, Connector};
pub use websocket::{WsConnection, WsConnector};

/// Connection health of a metrics source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected, not trying
    #[default]
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Receiving metrics
    Connected,
    /// Gave up after exhausting the reconnect budget
    Error,
}

impl ConnectionState {
    /// Name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// Whether the link is lost (disconnected or failed)
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving every valid sample
pub type MetricsCallback = Callback<MetricsSample>;

/// Callback receiving connection state changes
pub type ConnectionCallback = Callback<ConnectionState>;

/// Port for metrics producers
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Begin acquisition; a no-op if already active
    ///
    /// Only configuration problems are returned as errors. Transport
    /// failures surface as connection state changes.
    async fn start(&self) -> Result<(), SourceError>;

    /// Halt acquisition and release resources; safe if never started
    async fn stop(&self) -> Result<(), SourceError>;

    /// Add a metrics observer; returns false if already registered
    fn register_metrics(&self, callback: MetricsCallback) -> bool;

    /// Remove a metrics observer; returns false if it was not registered
    fn unregister_metrics(&self, callback: &MetricsCallback) -> bool;

    /// Add a connection state observer; returns false if already registered
    fn register_connection_state(&self, callback: ConnectionCallback) -> bool;

    /// Remove a connection state observer
    fn unregister_connection_state(&self, callback: &ConnectionCallback) -> bool;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Whether the source is connected
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}
