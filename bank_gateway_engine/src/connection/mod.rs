//! # Store resilience
//!
//! [`ConnectionManager`] wraps an [`crate::traits::OrderStore`] with the three mechanisms that keep the gateway
//! responsive while the store is struggling:
//!
//! * a [`CircuitBreaker`] per node that fails fast once the store looks unhealthy and probes for recovery,
//! * read routing to an optional replica, so that heavy reads do not contend with writes on the primary,
//! * a [`RequestCoalescer`] that collapses identical concurrent reads into one call.
mod circuit_breaker;
mod coalescer;
mod manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState, Permit};
pub use coalescer::RequestCoalescer;
pub use manager::{ConnectionConfig, ConnectionManager, HealthStatus, NodeHealth};
