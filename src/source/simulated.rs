// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Simulated metrics source
//!
//! Client of the telemetry simulator. A background task owns the connection:
//!
//! 1. publish `connecting` and open the connection under a timeout
//! 2. on success reset the backoff, publish `connected`, relay messages
//! 3. on close, error or timeout ask the [`ReconnectPolicy`] for a delay;
//!    publish `disconnected` and retry after it, or publish `error` and stop
//!
//! Inbound messages are validated against the telemetry schema. Invalid ones
//! are logged and dropped; valid ones go to every metrics observer.

use super::transport::{Connection, Connector};
use super::websocket::WsConnector;
use super::{ConnectionCallback, ConnectionState, MetricsCallback, MetricsSource};
use crate::config::SimulatedSourceConfig;
use crate::error::SourceError;
use crate::ids::InstanceId;
use crate::protocol::{BandState, ControlCommand, MetricsSample};
use crate::recovery::{Backoff, ReconnectPolicy};
use crate::registry::ObserverRegistry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Check that `url` is a ws:// or wss:// address with a host
pub fn validate_url(url: &str) -> Result<(), SourceError> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| SourceError::InvalidAddress {
            url: url.to_string(),
            reason: "scheme must be ws:// or wss://".to_string(),
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(SourceError::InvalidAddress {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

/// State shared between the adapter handle and its connection task
struct Shared {
    id: InstanceId,
    state: Mutex<ConnectionState>,
    metrics: ObserverRegistry<MetricsSample>,
    connection: ObserverRegistry<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    attempts: AtomicU32,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Update the state, notifying observers only on a change
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = lock(&self.state);
            if *state == next {
                return;
            }
            debug!(id = %self.id, from = %*state, to = %next, "Connection state change");
            *state = next;
        }
        self.connection.notify(&next);
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<String>>) {
        *lock(&self.outbound) = sender;
    }

    fn deliver(&self, text: &str) {
        match MetricsSample::from_wire(text) {
            Ok(sample) => {
                self.metrics.notify(&sample);
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "Dropping malformed metrics message");
            }
        }
    }
}

enum SessionEvent {
    Inbound(Option<Result<String, SourceError>>),
    Outbound(Option<String>),
}

/// Metrics source backed by the telemetry simulator
pub struct SimulatedSource<C: Connector = WsConnector> {
    id: InstanceId,
    config: SimulatedSourceConfig,
    connector: Arc<C>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSource<WsConnector> {
    /// Source connecting over WebSocket
    pub fn websocket(id: InstanceId, config: SimulatedSourceConfig) -> Self {
        Self::new(id, config, WsConnector::new())
    }
}

impl<C: Connector> SimulatedSource<C> {
    /// Create a source using a custom connector
    pub fn new(id: InstanceId, config: SimulatedSourceConfig, connector: C) -> Self {
        Self {
            id,
            config,
            connector: Arc::new(connector),
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(ConnectionState::Disconnected),
                metrics: ObserverRegistry::new("source.metrics"),
                connection: ObserverRegistry::new("source.connection"),
                outbound: Mutex::new(None),
                attempts: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Instance identifier
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Configuration in use
    pub fn config(&self) -> &SimulatedSourceConfig {
        &self.config
    }

    /// Reconnect attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Send a control message to the peer
    ///
    /// Returns false when not connected or the message could not be queued.
    pub fn send_control(&self, command: &ControlCommand) -> bool {
        if self.shared.state() != ConnectionState::Connected {
            debug!(id = %self.id, ?command, "Not connected, control message not sent");
            return false;
        }

        let text = match command.to_wire() {
            Ok(text) => text,
            Err(e) => {
                warn!(id = %self.id, error = %e, "Failed to encode control message");
                return false;
            }
        };

        match lock(&self.shared.outbound).as_ref() {
            Some(sender) => sender.send(text).is_ok(),
            None => false,
        }
    }

    /// Ask the peer to force a band state
    pub fn force_state(&self, state: BandState) -> bool {
        self.send_control(&ControlCommand::SetState { state })
    }

    /// Ask the peer to return to natural simulation
    pub fn clear_forced_state(&self) -> bool {
        self.send_control(&ControlCommand::ClearState)
    }

    async fn run(
        shared: Arc<Shared>,
        connector: Arc<C>,
        url: String,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
    ) {
        let mut backoff = Backoff::new();

        loop {
            shared.set_state(ConnectionState::Connecting);

            match tokio::time::timeout(connect_timeout, connector.connect(&url)).await {
                Ok(Ok(conn)) => {
                    backoff.reset();
                    shared.attempts.store(0, Ordering::SeqCst);
                    // Control messages are accepted as soon as `connected` is visible.
                    let (sender, outbound) = mpsc::unbounded_channel();
                    shared.set_outbound(Some(sender));
                    shared.set_state(ConnectionState::Connected);
                    info!(id = %shared.id, %url, "Connected to metrics peer");

                    Self::run_session(&shared, conn, outbound).await;
                }
                Ok(Err(e)) => {
                    warn!(id = %shared.id, %url, error = %e, "Connection failed");
                }
                Err(_) => {
                    let e = SourceError::Timeout {
                        timeout_ms: connect_timeout.as_millis() as u64,
                    };
                    warn!(id = %shared.id, %url, error = %e, "Connection failed");
                }
            }

            match backoff.next_delay(&policy) {
                Some(delay) => {
                    shared.attempts.store(backoff.attempts(), Ordering::SeqCst);
                    shared.set_state(ConnectionState::Disconnected);
                    info!(
                        id = %shared.id,
                        attempt = backoff.attempts(),
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        id = %shared.id,
                        attempts = backoff.attempts(),
                        "Reconnect budget exhausted, giving up"
                    );
                    shared.set_state(ConnectionState::Error);
                    return;
                }
            }
        }
    }

    async fn run_session(
        shared: &Shared,
        mut conn: C::Conn,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            let event = tokio::select! {
                inbound = conn.recv() => SessionEvent::Inbound(inbound),
                message = outbound.recv() => SessionEvent::Outbound(message),
            };

            match event {
                SessionEvent::Inbound(Some(Ok(text))) => shared.deliver(&text),
                SessionEvent::Inbound(Some(Err(e))) => {
                    warn!(id = %shared.id, error = %e, "Connection error");
                    break;
                }
                SessionEvent::Inbound(None) => {
                    info!(id = %shared.id, "Connection closed by peer");
                    break;
                }
                SessionEvent::Outbound(Some(text)) => {
                    if let Err(e) = conn.send(text).await {
                        warn!(id = %shared.id, error = %e, "Failed to send control message");
                        break;
                    }
                }
                SessionEvent::Outbound(None) => break,
            }
        }

        shared.set_outbound(None);
        conn.close().await;
    }
}

#[async_trait]
impl<C: Connector> MetricsSource for SimulatedSource<C> {
    async fn start(&self) -> Result<(), SourceError> {
        validate_url(&self.config.url)?;
        if !self.connector.is_available() {
            return Err(SourceError::UnsupportedPlatform(
                "transport cannot open connections on this platform".to_string(),
            ));
        }

        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(id = %self.id, "Source already running");
            return Ok(());
        }

        info!(id = %self.id, url = %self.config.url, "Starting simulated source");
        *task = Some(tokio::spawn(Self::run(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.config.url.clone(),
            self.config.reconnect_policy(),
            self.config.connect_timeout(),
        )));
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!(id = %self.id, "Simulated source stopped");
        }

        self.shared.set_outbound(None);
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn register_metrics(&self, callback: MetricsCallback) -> bool {
        self.shared.metrics.add(callback)
    }

    fn unregister_metrics(&self, callback: &MetricsCallback) -> bool {
        self.shared.metrics.remove(callback)
    }

    fn register_connection_state(&self, callback: ConnectionCallback) -> bool {
        self.shared.connection.add(callback)
    }

    fn unregister_connection_state(&self, callback: &ConnectionCallback) -> bool {
        self.shared.connection.remove(callback)
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }
}

impl<C: Connector> Drop for SimulatedSource<C> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://localhost:8765").is_ok());
        assert!(validate_url("wss://example.org/stream").is_ok());
        assert!(matches!(
            validate_url("http://localhost:8765"),
            Err(SourceError::InvalidAddress { .. })
        ));
        assert!(validate_url("localhost:8765").is_err());
        assert!(validate_url("ws://").is_err());
        assert!(validate_url("ws:///path").is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_scheme() {
        let source = SimulatedSource::websocket(
            InstanceId::new(1),
            SimulatedSourceConfig::with_url("tcp://localhost:8765"),
        );
        assert!(matches!(
            source.start().await,
            Err(SourceError::InvalidAddress { .. })
        ));
        assert_eq!(source.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let source =
            SimulatedSource::websocket(InstanceId::new(2), SimulatedSourceConfig::default());
        assert!(source.stop().await.is_ok());
        assert!(!source.is_connected());
        assert!(!source.clear_forced_state());
    }
}
