use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::kv::MemoryKv;

/// Periodically reclaims expired cache and rate-limit entries from the
/// in-process store. Expired entries are already invisible to readers, so
/// this only bounds memory.
pub async fn sweep_expired_keys_task(store: Arc<MemoryKv>, every: Duration) {
    info!("Starting background task to sweep expired keys every {:?}", every);
    let mut interval = interval(every);

    loop {
        interval.tick().await;
        let removed = store.purge_expired();
        if removed > 0 {
            info!("Swept {} expired key(s), {} left", removed, store.len());
        } else {
            debug!("No expired keys to sweep");
        }
    }
}
