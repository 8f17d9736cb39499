//! Key-value store with TTLs and an atomic windowed counter. Backs both the
//! poll cache and the rate limiter; any store that can do these four things
//! works.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::KvError;

mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

pub use memory::MemoryKv;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisKv;

/// A windowed counter: how many hits so far and how long until it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub resets_in: Duration,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Reads a counter without touching it.
    async fn counter(&self, key: &str) -> Result<Option<Counter>, KvError>;

    /// Increments the counter at `key` in one atomic step, starting a new
    /// window of length `window` if the key is absent or expired.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<Counter, KvError>;
}
