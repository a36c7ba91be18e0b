// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Hardware headset source (not implemented)
//!
//! Satisfies the [`MetricsSource`] contract so it can be selected at
//! construction time, but `start()` fails until a headset integration exists.

use super::{ConnectionCallback, ConnectionState, MetricsCallback, MetricsSource};
use crate::error::SourceError;
use crate::ids::InstanceId;
use crate::protocol::MetricsSample;
use crate::registry::ObserverRegistry;
use async_trait::async_trait;
use tracing::warn;

/// Placeholder for a headset-backed metrics source
#[derive(Debug)]
pub struct HardwareSource {
    id: InstanceId,
    metrics: ObserverRegistry<MetricsSample>,
    connection: ObserverRegistry<ConnectionState>,
}

impl HardwareSource {
    /// Create the stub
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            metrics: ObserverRegistry::new("hardware.metrics"),
            connection: ObserverRegistry::new("hardware.connection"),
        }
    }
}

#[async_trait]
impl MetricsSource for HardwareSource {
    async fn start(&self) -> Result<(), SourceError> {
        warn!(id = %self.id, "Hardware source requested but not available");
        Err(SourceError::NotImplemented(
            "hardware metrics source".to_string(),
        ))
    }

    async fn stop(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn register_metrics(&self, callback: MetricsCallback) -> bool {
        self.metrics.add(callback)
    }

    fn unregister_metrics(&self, callback: &MetricsCallback) -> bool {
        self.metrics.remove(callback)
    }

    fn register_connection_state(&self, callback: ConnectionCallback) -> bool {
        self.connection.add(callback)
    }

    fn unregister_connection_state(&self, callback: &ConnectionCallback) -> bool {
        self.connection.remove(callback)
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_not_implemented() {
        let source = HardwareSource::new(InstanceId::new(9));
        assert!(matches!(
            source.start().await,
            Err(SourceError::NotImplemented(_))
        ));
        assert!(source.stop().await.is_ok());
        assert!(!source.is_connected());
    }
}
