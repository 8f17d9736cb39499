use std::sync::Arc;

use crate::error::StorageError;
use crate::ledger::{OptionTally, VoteLedger};
use crate::models::ResultRow;

/// Per-option counts and percentages, recomputed from the ledger on every
/// call. Nothing is stored, so counts can never drift from the votes.
#[derive(Clone)]
pub struct ResultsAggregator {
    ledger: Arc<dyn VoteLedger>,
}

impl ResultsAggregator {
    pub fn new(ledger: Arc<dyn VoteLedger>) -> Self {
        Self { ledger }
    }

    pub async fn get_results(&self, poll_id: &str) -> Result<Vec<ResultRow>, StorageError> {
        let tallies = self.ledger.tally(poll_id).await?;
        Ok(compute_results(&tallies))
    }
}

/// Turns tallies into result rows, keeping the tallies' order. Percentages
/// are rounded to two decimals and are all zero when nobody has voted.
pub fn compute_results(tallies: &[OptionTally]) -> Vec<ResultRow> {
    let total: u64 = tallies.iter().map(|tally| tally.votes).sum();

    tallies
        .iter()
        .map(|tally| ResultRow {
            option_id: tally.option_id.clone(),
            vote_count: tally.votes,
            percentage: percentage(tally.votes, total),
        })
        .collect()
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}
