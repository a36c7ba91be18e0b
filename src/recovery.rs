// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Automatic reconnection
//!
//! Linear backoff bounded by a maximum number of attempts. The n-th retry
//! after a failure waits `base_delay * n`; once the attempt budget is spent
//! the caller gives up and reports an error state.

use std::time::Duration;

/// Reconnect policy for a metrics source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all
    pub enabled: bool,
    /// Maximum number of consecutive reconnect attempts
    pub max_attempts: u32,
    /// Delay unit; attempt n waits `base_delay * n`
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Linear policy with the given budget and delay unit
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            enabled: true,
            max_attempts,
            base_delay,
        }
    }

    /// Delay before attempt number `attempt` (1-indexed)
    ///
    /// Returns None if the attempt is outside the budget.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

/// Consecutive-failure bookkeeping for one connection
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    /// Fresh tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts made since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and return how long to wait before retrying
    ///
    /// Returns None when the policy forbids another attempt; the counter is
    /// left unchanged in that case.
    pub fn next_delay(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        let delay = policy.delay_for_attempt(self.attempts + 1)?;
        self.attempts += 1;
        Some(delay)
    }

    /// Record a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
