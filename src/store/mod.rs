//! Counter storage backends.
//!
//! The engine counts requests through the [`CounterStore`] trait, which has
//! two implementations: an in-process sharded map for single-instance
//! deployments (and as the degradation fallback), and a Redis-backed store
//! that serializes increments across service instances. Fallback-on-failure
//! logic lives in the admission engine, not here; a store either answers or
//! fails fast.

mod memory;
mod redis;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in counter storage operations.
///
/// All variants are transient from the engine's point of view: they trigger
/// the in-process fallback for the failing call and never propagate to the
/// caller of `check`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("Counter storage unavailable: {0}")]
    Unavailable(String),
    /// The backing store did not answer within the configured deadline.
    #[error("Counter storage timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// The counter value after this increment.
    pub count: u64,
    /// Whether this increment created the counter (and set its TTL).
    pub newly_created: bool,
}

/// Trait for atomic increment-with-expiry counter storage.
///
/// Implementations must guarantee that concurrent increments of the same key
/// never lose an increment, and that the TTL is set exactly once, at
/// creation, by exactly one caller. Refreshing the TTL on every increment
/// would keep hot windows from ever closing, so it is forbidden by contract.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it with `ttl` if absent.
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<IncrementOutcome, StoreError>;
}
