//! Orchestrates a vote from request to results.
//!
//! A cast walks these stages in order, and any gate can reject it before the
//! ledger is touched:
//!
//! ```text
//! Received -> IdentityResolved -> RateChecked -> PollValidated
//!          -> ExistingVoteChecked -> Written -> ResultsInvalidated -> Completed
//! ```
//!
//! The poll snapshot is loaded on entry because identity resolution needs the
//! poll's anonymous-voting flag; the policy checks themselves happen at
//! `PollValidated`. Quota is only spent once every check has passed.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{PollCache, PollSource};
use crate::error::{StorageError, VoteError};
use crate::identity;
use crate::ledger::{DeleteScope, VoteLedger, WriteMode};
use crate::models::{
    Ballot, CastVoteResponse, MyVotesResponse, PollSnapshot, RemoveVotesResponse, Requester,
    ResultRow, Visibility, VoterIdentity,
};
use crate::notify::ResultsNotifier;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::results::ResultsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    IdentityResolved,
    RateChecked,
    PollValidated,
    ExistingVoteChecked,
    Written,
    ResultsInvalidated,
    Completed,
}

/// Bounded exponential backoff for ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Runs `op` until it succeeds, fails permanently, or runs out of
    /// attempts. Only transient storage errors are retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, VoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(storage_failure(what, e)),
            }
        }
    }
}

// Maps a storage fault to what the client may see. The cause is only logged.
fn storage_failure(what: &str, e: StorageError) -> VoteError {
    if e.is_foreign_key_violation() {
        warn!("{} referenced a missing poll or option: {}", what, e);
        VoteError::Validation("One or more options no longer exist".into())
    } else if e.is_transient() {
        error!("{} failed, storage unavailable: {}", what, e);
        VoteError::Unavailable
    } else {
        error!("{} failed: {}", what, e);
        VoteError::Internal
    }
}

/// Checks a ballot against the poll's policy and picks how it is written.
pub fn validate_ballot(
    snapshot: &PollSnapshot,
    identity: &VoterIdentity,
    ballot: &Ballot,
    now: DateTime<Utc>,
) -> Result<WriteMode, VoteError> {
    if snapshot.is_expired(now) {
        return Err(VoteError::Expired);
    }

    if snapshot.visibility == Visibility::Private && !snapshot.is_creator(identity) {
        return Err(VoteError::AccessDenied("This poll is private".into()));
    }

    if let Some(unknown) = ballot.option_ids().iter().find(|id| !snapshot.has_option(id)) {
        return Err(VoteError::Validation(format!(
            "Option {} does not belong to this poll",
            unknown
        )));
    }

    if snapshot.multiple_votes_allowed {
        Ok(WriteMode::Additive)
    } else if ballot.len() > 1 {
        Err(VoteError::Validation(
            "This poll accepts a single option per vote".into(),
        ))
    } else {
        Ok(WriteMode::Exclusive)
    }
}

/// Everything the coordinator talks to, handed in at construction.
pub struct Collaborators {
    pub polls: Arc<dyn PollSource>,
    pub cache: PollCache,
    pub limiter: RateLimiter,
    pub ledger: Arc<dyn VoteLedger>,
    pub results: ResultsAggregator,
    pub notifier: Arc<dyn ResultsNotifier>,
}

pub struct VoteCoordinator {
    polls: Arc<dyn PollSource>,
    cache: PollCache,
    limiter: RateLimiter,
    ledger: Arc<dyn VoteLedger>,
    results: ResultsAggregator,
    notifier: Arc<dyn ResultsNotifier>,
    retry: RetryPolicy,
}

impl VoteCoordinator {
    pub fn new(collaborators: Collaborators, retry: RetryPolicy) -> Self {
        let Collaborators {
            polls,
            cache,
            limiter,
            ledger,
            results,
            notifier,
        } = collaborators;

        Self {
            polls,
            cache,
            limiter,
            ledger,
            results,
            notifier,
            retry,
        }
    }

    fn enter(&self, poll_id: &str, stage: Stage) {
        debug!("poll {}: {:?}", poll_id, stage);
    }

    async fn snapshot(&self, poll_id: &str) -> Result<PollSnapshot, VoteError> {
        match self.cache.load(poll_id, self.polls.as_ref()).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(VoteError::PollNotFound),
            Err(e) => Err(storage_failure("load poll", e)),
        }
    }

    async fn invalidate(&self, poll_id: &str) {
        if let Err(e) = self.notifier.results_changed(poll_id).await {
            warn!("Could not signal new results for poll {}: {}", poll_id, e);
        }
    }

    pub async fn results(&self, poll_id: &str) -> Result<Vec<ResultRow>, VoteError> {
        self.snapshot(poll_id).await?;
        self.current_results(poll_id).await
    }

    async fn current_results(&self, poll_id: &str) -> Result<Vec<ResultRow>, VoteError> {
        let results = &self.results;
        self.retry
            .run("read results", move || results.get_results(poll_id))
            .await
    }

    // Runs once a change has committed, so a failed read must not turn into a
    // failed vote. The caller gets empty results and can fetch them later.
    async fn results_after_change(&self, poll_id: &str) -> Vec<ResultRow> {
        match self.current_results(poll_id).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Change to poll {} committed but results are unreadable: {}", poll_id, e);
                Vec::new()
            }
        }
    }

    pub async fn cast_vote(
        &self,
        poll_id: &str,
        requester: &Requester,
        ballot: &Ballot,
    ) -> Result<CastVoteResponse, VoteError> {
        self.enter(poll_id, Stage::Received);
        let snapshot = self.snapshot(poll_id).await?;

        let identity = identity::resolve(
            requester.user_id.as_deref(),
            requester.fingerprint.as_deref(),
            snapshot.anonymous_allowed,
        )?;
        self.enter(poll_id, Stage::IdentityResolved);

        if let RateDecision::Denied { retry_after_secs } = self.limiter.peek(&identity).await {
            info!("{} is over the vote quota for poll {}", identity.key(), poll_id);
            return Err(VoteError::RateLimited { retry_after_secs });
        }
        self.enter(poll_id, Stage::RateChecked);

        let mode = validate_ballot(&snapshot, &identity, ballot, Utc::now())?;
        self.enter(poll_id, Stage::PollValidated);

        // Informational only. Replacement happens atomically in the write.
        if mode == WriteMode::Exclusive {
            match self.ledger.list_votes(poll_id, &identity).await {
                Ok(existing) if !existing.is_empty() => {
                    debug!("{} already voted in poll {}, replacing", identity.key(), poll_id)
                }
                Ok(_) => {}
                Err(e) => warn!("Could not look up prior vote in poll {}: {}", poll_id, e),
            }
        }
        self.enter(poll_id, Stage::ExistingVoteChecked);

        // Quota is spent before the write so the atomic increment settles
        // concurrent casts; a write that then exhausts its retries still costs one unit.
        if let RateDecision::Denied { retry_after_secs } = self.limiter.check(&identity).await {
            info!("{} hit the vote quota for poll {}", identity.key(), poll_id);
            return Err(VoteError::RateLimited { retry_after_secs });
        }

        let ledger = &self.ledger;
        let option_ids = ballot.option_ids();
        let voter = &identity;
        let votes = self
            .retry
            .run("record ballot", move || {
                ledger.record_ballot(poll_id, option_ids, voter, mode)
            })
            .await?;
        self.enter(poll_id, Stage::Written);
        info!(
            "Recorded {} vote(s) in poll {} for {}",
            votes.len(),
            poll_id,
            identity.key()
        );

        self.invalidate(poll_id).await;
        self.enter(poll_id, Stage::ResultsInvalidated);

        let results = self.results_after_change(poll_id).await;
        self.enter(poll_id, Stage::Completed);

        Ok(CastVoteResponse {
            success: true,
            votes,
            results,
        })
    }

    pub async fn my_votes(
        &self,
        poll_id: &str,
        requester: &Requester,
    ) -> Result<MyVotesResponse, VoteError> {
        let snapshot = self.snapshot(poll_id).await?;
        let identity = identity::resolve(
            requester.user_id.as_deref(),
            requester.fingerprint.as_deref(),
            snapshot.anonymous_allowed,
        )?;

        let votes = self
            .ledger
            .list_votes(poll_id, &identity)
            .await
            .map_err(|e| storage_failure("list votes", e))?;

        Ok(MyVotesResponse {
            has_voted: !votes.is_empty(),
            votes,
        })
    }

    /// Removes the requester's own votes, or with `delete_all` every vote in
    /// the poll, which only the poll's creator may do.
    pub async fn remove_votes(
        &self,
        poll_id: &str,
        requester: &Requester,
        delete_all: bool,
    ) -> Result<RemoveVotesResponse, VoteError> {
        let snapshot = self.snapshot(poll_id).await?;
        let ledger = &self.ledger;

        let removed = if delete_all {
            if requester.user_id.as_deref() != Some(snapshot.creator_id.as_str()) {
                return Err(VoteError::AccessDenied(
                    "Only the poll creator can remove all votes".into(),
                ));
            }

            self.retry
                .run("delete all votes", move || {
                    ledger.delete_votes(poll_id, DeleteScope::All)
                })
                .await?
        } else {
            let identity = identity::resolve(
                requester.user_id.as_deref(),
                requester.fingerprint.as_deref(),
                snapshot.anonymous_allowed,
            )?;
            if snapshot.is_expired(Utc::now()) {
                return Err(VoteError::Expired);
            }

            let voter = &identity;
            self.retry
                .run("delete votes", move || {
                    ledger.delete_votes(poll_id, DeleteScope::Voter(voter))
                })
                .await?
        };

        info!("Removed {} vote(s) from poll {}", removed, poll_id);
        if removed > 0 {
            self.invalidate(poll_id).await;
        }

        Ok(RemoveVotesResponse {
            success: true,
            removed,
            results: self.results_after_change(poll_id).await,
        })
    }
}
