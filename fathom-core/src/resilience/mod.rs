//! Retry, circuit breaking, and offline caching around storage clients.

pub mod breaker;
pub mod cache;
pub mod retry;
pub mod wrapper;

pub use breaker::{BreakerRegistry, BreakerState, CircuitBreaker, Gate};
pub use cache::{ListingSnapshot, SnapshotCache, SnapshotStats, StatSnapshot};
pub use retry::RetryPolicy;
pub use wrapper::ResilientClient;
