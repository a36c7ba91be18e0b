// FlowState Sim - Simulated EEG metrics server
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FlowState Sim
//!
//! Development peer for the FlowState simulated metrics source.
//!
//! - **Generator**: band power drifting slowly around a baseline, with
//!   forced low/normal/high states for exercising the controller
//! - **Raw pipeline**: multi-channel synthetic EEG processed into band
//!   power and z-scores against a calibrated baseline
//! - **Server**: WebSocket endpoint streaming one sample per tick to every
//!   connected client and accepting `set_state` / `clear_state` commands
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowstate_sim::{ServerConfig, SimulatorServer};
//!
//! # async fn run() -> Result<(), flowstate_sim::SimError> {
//! let server = SimulatorServer::bind(ServerConfig {
//!     port: 8765,
//!     rate_hz: 10,
//!     ..Default::default()
//! })
//! .await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod generator;
pub mod raw;
pub mod server;

// Re-exports for convenience
pub use generator::{EegSimulator, GeneratorConfig, SampleGenerator};
pub use raw::{RawEegConfig, RawPipeline, SyntheticEeg};
pub use server::{apply_control, ControlOutcome, ServerConfig, ServerStats, SimError, SimulatorServer};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
