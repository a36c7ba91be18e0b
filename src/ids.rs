// FlowState - Closed-loop entrainment control
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.


//! Instance identifiers for log correlation.
//!
//! Identifiers are issued by an [`IdFactory`] owned by whoever wires the
//! components together. They appear in log lines only and never influence
//! behavior.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Wrap a raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic source of [`InstanceId`]s
#[derive(Debug)]
pub struct IdFactory {
    next: AtomicU64,
}

impl IdFactory {
    /// Factory whose first id is 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issue the next id
    pub fn next_id(&self) -> InstanceId {
        InstanceId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let factory = IdFactory::new();
        let a = factory.next_id();
        let b = factory.next_id();
        assert_eq!(a.value(), 1);
        assert!(b > a);
        assert_eq!(b.to_string(), "#2");
    }

    #[test]
    fn test_factories_are_independent() {
        let f1 = IdFactory::new();
        let f2 = IdFactory::new();
        f1.next_id();
        assert_eq!(f2.next_id(), InstanceId::new(1));
    }
}
