use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::kv::KvStore;
use crate::models::{Poll, PollSnapshot};

pub const DEFAULT_POLL_TTL: Duration = Duration::from_secs(300);

/// The poll-metadata collaborator. Polls are created and edited elsewhere;
/// this core only ever reads them.
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, StorageError>;
}

/// Read-through TTL cache of poll voting policy. Entries are never
/// invalidated explicitly; a poll edit is picked up once the TTL lapses.
/// Every cache failure degrades to a miss.
pub struct PollCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

fn cache_key(poll_id: &str) -> String {
    format!("poll:{}", poll_id)
}

impl PollCache {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn get(&self, poll_id: &str) -> Option<PollSnapshot> {
        let raw = match self.store.get(&cache_key(poll_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Poll cache degraded, reading poll {} from source: {}", poll_id, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Discarding unreadable cached snapshot for poll {}: {}", poll_id, e);
                None
            }
        }
    }

    pub async fn put(&self, poll_id: &str, snapshot: &PollSnapshot, ttl: Duration) {
        let raw = match serde_json::to_string(snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not encode snapshot for poll {}: {}", poll_id, e);
                return;
            }
        };

        if let Err(e) = self.store.set_ex(&cache_key(poll_id), &raw, ttl).await {
            warn!("Poll cache degraded, snapshot for {} not stored: {}", poll_id, e);
        }
    }

    /// Cached snapshot if present, otherwise fetch from `source` and fill the
    /// cache. `Ok(None)` means the poll does not exist.
    pub async fn load(
        &self,
        poll_id: &str,
        source: &dyn PollSource,
    ) -> Result<Option<PollSnapshot>, StorageError> {
        if let Some(snapshot) = self.get(poll_id).await {
            debug!("Poll cache hit for {}", poll_id);
            return Ok(Some(snapshot));
        }

        debug!("Poll cache miss for {}", poll_id);
        let Some(poll) = source.fetch_poll(poll_id).await? else {
            return Ok(None);
        };

        let snapshot = PollSnapshot::from(&poll);
        self.put(poll_id, &snapshot, self.ttl).await;
        Ok(Some(snapshot))
    }
}
