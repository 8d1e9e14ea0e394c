//! Risk controls for the decision loop.
//!
//! The circuit breaker is checked before every cycle's fetch and halts the
//! loop once drawdown, daily loss or a losing streak breaches its limits.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, TripKind, TripReason,
};
