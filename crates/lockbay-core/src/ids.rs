//! Identifier types and injectable ID generation.
//!
//! All identifiers are opaque integers. Components that mint identifiers take
//! an [`IdGenerator`] at construction instead of reaching for a process-wide
//! counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Locker identifier.
pub type LockerId = u64;

/// Package identifier.
pub type PackageId = u64;

/// Customer identifier.
pub type CustomerId = u64;

/// Ticket identifier.
pub type TicketId = u64;

/// Source of fresh identifiers.
///
/// Implementations must never return the same value twice for the lifetime
/// of the component they are injected into.
pub trait IdGenerator: Send + Sync {
    /// Returns the next identifier.
    fn next_id(&self) -> u64;
}

/// Monotonic counter starting at a configurable first value.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Counter whose first identifier is `1`.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first identifier is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
