//! Shared run state: control flags and cycle counters.
//!
//! Both are plain atomics so a signal handler (or another task) can read
//! and flip them while the orchestrator owns everything else.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Control flags shared between the orchestrator and its owner.
#[derive(Debug)]
pub struct ControlFlags {
    /// Graceful shutdown requested.
    pub shutdown_requested: AtomicBool,

    /// Circuit breaker tripped state, mirrored for observers.
    pub circuit_breaker_tripped: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self {
            shutdown_requested: AtomicBool::new(false),
            circuit_breaker_tripped: AtomicBool::new(false),
        }
    }

    /// Request graceful shutdown. Takes effect at the next cycle boundary.
    #[inline]
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_circuit_breaker_tripped(&self, tripped: bool) {
        self.circuit_breaker_tripped.store(tripped, Ordering::Release);
    }

    #[inline]
    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.circuit_breaker_tripped.load(Ordering::Acquire)
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycle counters.
///
/// Uses relaxed ordering since exact counts aren't critical.
#[derive(Debug, Default)]
pub struct CycleCounters {
    pub cycles: AtomicU64,
    pub executed: AtomicU64,
    pub decided: AtomicU64,
    pub holds: AtomicU64,
    pub blocked: AtomicU64,
    pub errors: AtomicU64,
}

impl CycleCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc_cycles(&self) -> u64 {
        self.cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn inc_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_decided(&self) {
        self.decided.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_holds(&self) {
        self.holds.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            decided: self.decided.load(Ordering::Relaxed),
            holds: self.holds.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CounterSnapshot {
    pub cycles: u64,
    pub executed: u64,
    pub decided: u64,
    pub holds: u64,
    pub blocked: u64,
    pub errors: u64,
}
