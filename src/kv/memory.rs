use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{Counter, KvStore};
use crate::error::KvError;

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store. Expired entries are invisible immediately and
/// reclaimed by `purge_expired`.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".into()))
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.is_live(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deadline(now: Instant, ttl: Duration) -> Result<Instant, KvError> {
    now.checked_add(ttl).ok_or(KvError::TtlOutOfRange(ttl))
}

fn parse_count(key: &str, value: &str) -> Result<u64, KvError> {
    value
        .parse::<u64>()
        .map_err(|_| KvError::NotACounter(key.to_string()))
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let now = Instant::now();
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let expires_at = deadline(Instant::now(), ttl)?;
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<Option<Counter>, KvError> {
        let now = Instant::now();
        let entries = self.lock()?;
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => Ok(Some(Counter {
                count: parse_count(key, &entry.value)?,
                resets_in: entry.expires_at - now,
            })),
            None => Ok(None),
        }
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<Counter, KvError> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        let (count, expires_at) = match entries.get(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => (parse_count(key, &entry.value)? + 1, entry.expires_at),
            None => (1, deadline(now, window)?),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );

        Ok(Counter {
            count,
            resets_in: expires_at - now,
        })
    }
}
