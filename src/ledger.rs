//! The vote ledger: durable vote rows and the single-vote invariant.
//!
//! Under [`WriteMode::Exclusive`] a (poll, identity) pair owns at most one
//! row. That is enforced by the store's own conditional write, never by a
//! read followed by a write, so concurrent re-votes always collapse into one
//! surviving row holding whichever option committed last.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{BatchEntry, Vote, VoterIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Single-vote poll: insert, or replace the identity's existing row.
    Exclusive,
    /// Multi-vote poll: plain insert, no uniqueness check.
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope<'a> {
    Voter(&'a VoterIdentity),
    /// Every vote in the poll. Callers check that the requester may do this.
    All,
}

/// Vote count of one option, in option order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTally {
    pub option_id: String,
    pub ordinal: i64,
    pub votes: u64,
}

#[async_trait]
pub trait VoteLedger: Send + Sync {
    /// Records every option of one ballot, or none of them.
    async fn record_ballot(
        &self,
        poll_id: &str,
        option_ids: &[String],
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vec<Vote>, StorageError>;

    async fn record_vote(
        &self,
        poll_id: &str,
        option_id: &str,
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vote, StorageError> {
        let option_ids = [option_id.to_string()];
        let mut votes = self.record_ballot(poll_id, &option_ids, identity, mode).await?;
        votes
            .pop()
            .ok_or_else(|| StorageError::Corrupt(format!("no row returned for poll {}", poll_id)))
    }

    /// The identity's votes in this poll, oldest first.
    async fn list_votes(
        &self,
        poll_id: &str,
        identity: &VoterIdentity,
    ) -> Result<Vec<Vote>, StorageError>;

    async fn delete_votes(&self, poll_id: &str, scope: DeleteScope<'_>) -> Result<u64, StorageError>;

    /// Per-option counts for every option of the poll, zero counts included.
    async fn tally(&self, poll_id: &str) -> Result<Vec<OptionTally>, StorageError>;

    /// Bulk insert of one chunk in a single transaction. No uniqueness
    /// check: callers are expected to have deduplicated the entries.
    async fn insert_chunk(&self, poll_id: &str, entries: &[BatchEntry]) -> Result<u64, StorageError>;
}
