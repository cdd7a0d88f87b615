//! Redis-backed shared counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::{CounterStore, IncrementOutcome, StoreError};

/// Atomic INCR + first-time PEXPIRE, executed as a single round-trip.
///
/// The expiry is set only when the counter is created. Setting it on every
/// increment would keep a hot window alive forever under sustained load, so
/// the script checks for `count == 1` server-side where no other client can
/// interleave.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// A counter store shared across service instances through Redis.
///
/// Redis serializes all commands, so the N-th successful increment of a key
/// is globally the N-th request counted, even under concurrent submission
/// from multiple instances. Every call is bounded by a timeout; a slow or
/// unreachable server fails fast instead of stalling the request path.
pub struct RedisCounterStore {
    connection: ConnectionManager,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Recommended per-call deadline. Keeps a degraded Redis from turning
    /// into unbounded request latency.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

    /// Connect to Redis with the default per-call timeout.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, Self::DEFAULT_TIMEOUT).await
    }

    /// Connect to Redis with an explicit per-call timeout.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Connected to Redis counter store");
        Ok(Self {
            connection,
            timeout,
        })
    }

    /// Build a store from an existing connection manager.
    pub fn with_connection(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<IncrementOutcome, StoreError> {
        // ConnectionManager clones share one multiplexed connection.
        let mut connection = self.connection.clone();

        // PEXPIRE takes a signed integer; clamp rather than wrap.
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let script = Script::new(INCREMENT_SCRIPT);
        let call = async {
            let count: redis::RedisResult<u64> = script
                .key(key)
                .arg(ttl_ms)
                .invoke_async(&mut connection)
                .await;
            count
        };

        let count = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => return Err(StoreError::Timeout(self.timeout)),
            Ok(result) => result.map_err(|e| StoreError::Unavailable(e.to_string()))?,
        };

        trace!(key = %key, count = count, "Incremented shared counter");
        Ok(IncrementOutcome {
            count,
            newly_created: count == 1,
        })
    }
}
