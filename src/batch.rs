use log::{info, warn};
use std::sync::Arc;

use crate::ledger::VoteLedger;
use crate::models::{BatchEntry, BatchReport};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Bulk vote import for backfills. Entries are written in fixed-size chunks,
/// each in its own transaction, so a bad chunk only loses itself.
///
/// This path does not apply the single-vote rule: entries are inserted as
/// given and callers must deduplicate them first. It is meant for trusted
/// administrative callers only. Identities are still checked like an
/// interactive voter's, and malformed entries are skipped and reported.
pub struct BatchProcessor {
    ledger: Arc<dyn VoteLedger>,
    chunk_size: usize,
}

impl BatchProcessor {
    pub fn new(ledger: Arc<dyn VoteLedger>, chunk_size: usize) -> Self {
        Self {
            ledger,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn accept(&self, poll_id: &str, entries: &[BatchEntry]) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, chunk) in entries.chunks(self.chunk_size).enumerate() {
            let start = index * self.chunk_size;
            let end = start + chunk.len();

            // Bad identities are reported per entry; the rest of the chunk still goes in
            let mut valid = Vec::with_capacity(chunk.len());
            for (offset, entry) in chunk.iter().enumerate() {
                match entry.validate() {
                    Ok(()) => valid.push(entry.clone()),
                    Err(e) => {
                        report.failed += 1;
                        report.errors.push(format!("entry {}: {}", start + offset, e));
                    }
                }
            }
            if valid.is_empty() {
                continue;
            }

            match self.ledger.insert_chunk(poll_id, &valid).await {
                Ok(_) => report.processed += valid.len(),
                Err(e) => {
                    warn!(
                        "Batch chunk {} (entries {}..{}) for poll {} failed: {}",
                        index + 1,
                        start,
                        end,
                        poll_id,
                        e
                    );
                    report.failed += valid.len();
                    report.errors.push(format!(
                        "chunk {} (entries {}..{}): {}",
                        index + 1,
                        start,
                        end,
                        e.public_message()
                    ));
                }
            }
        }

        info!(
            "Batch import for poll {}: {} processed, {} failed",
            poll_id, report.processed, report.failed
        );
        report
    }
}
