#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use trusty_tally::cache::PollCache;
use trusty_tally::error::{KvError, StorageError};
use trusty_tally::kv::{Counter, KvStore, MemoryKv};
use trusty_tally::ledger::{DeleteScope, OptionTally, VoteLedger, WriteMode};
use trusty_tally::models::{BatchEntry, Poll, Vote, VoterIdentity};
use trusty_tally::notify::{BroadcastNotifier, NotifyError, ResultsNotifier};
use trusty_tally::{
    Collaborators, Database, RateLimitConfig, RateLimiter, ResultsAggregator, RetryPolicy,
    VoteCoordinator,
};

pub async fn memory_db() -> Arc<Database> {
    Arc::new(Database::connect("sqlite::memory:").await.unwrap())
}

/// File-backed database, for tests that need real concurrent connections.
pub async fn file_db(dir: &TempDir) -> Arc<Database> {
    let url = format!("sqlite:{}", dir.path().join("votes.db").display());
    Arc::new(Database::connect(&url).await.unwrap())
}

pub async fn seed(db: &Database, poll: Poll) -> Poll {
    db.create_poll(&poll).await.unwrap();
    poll
}

pub fn two_option_poll() -> Poll {
    Poll::new("creator".into(), "Tabs or spaces?".into(), vec!["Tabs".into(), "Spaces".into()])
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

pub struct CoordinatorBuilder {
    db: Arc<Database>,
    ledger: Option<Arc<dyn VoteLedger>>,
    results_ledger: Option<Arc<dyn VoteLedger>>,
    store: Arc<dyn KvStore>,
    notifier: Arc<dyn ResultsNotifier>,
    rate_limit: RateLimitConfig,
}

pub fn coordinator(db: &Arc<Database>) -> CoordinatorBuilder {
    CoordinatorBuilder {
        db: Arc::clone(db),
        ledger: None,
        results_ledger: None,
        store: Arc::new(MemoryKv::new()),
        notifier: Arc::new(BroadcastNotifier::default()),
        rate_limit: RateLimitConfig::default(),
    }
}

impl CoordinatorBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn VoteLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Ledger the results aggregator reads tallies from.
    pub fn results_ledger(mut self, ledger: Arc<dyn VoteLedger>) -> Self {
        self.results_ledger = Some(ledger);
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = store;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ResultsNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn rate_limit(mut self, max_votes: u64) -> Self {
        self.rate_limit.max_votes = max_votes;
        self
    }

    pub fn build(self) -> VoteCoordinator {
        let ledger: Arc<dyn VoteLedger> = match self.ledger {
            Some(ledger) => ledger,
            None => self.db.clone(),
        };

        let results_ledger: Arc<dyn VoteLedger> = match self.results_ledger {
            Some(ledger) => ledger,
            None => self.db.clone(),
        };

        VoteCoordinator::new(
            Collaborators {
                polls: self.db.clone(),
                cache: PollCache::new(Arc::clone(&self.store), Duration::from_secs(300)),
                limiter: RateLimiter::new(Arc::clone(&self.store), self.rate_limit),
                ledger,
                results: ResultsAggregator::new(results_ledger),
                notifier: self.notifier,
            },
            fast_retry(),
        )
    }
}

pub fn transient() -> StorageError {
    StorageError::from(sqlx::Error::PoolTimedOut)
}

/// Ledger that fails its next `failures` ballot writes with a transient
/// error before passing through to the database.
pub struct FlakyLedger {
    inner: Arc<Database>,
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyLedger {
    pub fn new(inner: Arc<Database>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VoteLedger for FlakyLedger {
    async fn record_ballot(
        &self,
        poll_id: &str,
        option_ids: &[String],
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vec<Vote>, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(transient());
        }
        self.inner.record_ballot(poll_id, option_ids, identity, mode).await
    }

    async fn list_votes(
        &self,
        poll_id: &str,
        identity: &VoterIdentity,
    ) -> Result<Vec<Vote>, StorageError> {
        self.inner.list_votes(poll_id, identity).await
    }

    async fn delete_votes(&self, poll_id: &str, scope: DeleteScope<'_>) -> Result<u64, StorageError> {
        self.inner.delete_votes(poll_id, scope).await
    }

    async fn tally(&self, poll_id: &str) -> Result<Vec<OptionTally>, StorageError> {
        self.inner.tally(poll_id).await
    }

    async fn insert_chunk(&self, poll_id: &str, entries: &[BatchEntry]) -> Result<u64, StorageError> {
        self.inner.insert_chunk(poll_id, entries).await
    }
}

/// Ledger whose next `failures` tallies fail with a transient error.
pub struct FlakyTally {
    inner: Arc<Database>,
    failures: AtomicUsize,
}

impl FlakyTally {
    pub fn new(inner: Arc<Database>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl VoteLedger for FlakyTally {
    async fn record_ballot(
        &self,
        poll_id: &str,
        option_ids: &[String],
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vec<Vote>, StorageError> {
        self.inner.record_ballot(poll_id, option_ids, identity, mode).await
    }

    async fn list_votes(
        &self,
        poll_id: &str,
        identity: &VoterIdentity,
    ) -> Result<Vec<Vote>, StorageError> {
        self.inner.list_votes(poll_id, identity).await
    }

    async fn delete_votes(&self, poll_id: &str, scope: DeleteScope<'_>) -> Result<u64, StorageError> {
        self.inner.delete_votes(poll_id, scope).await
    }

    async fn tally(&self, poll_id: &str) -> Result<Vec<OptionTally>, StorageError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(transient());
        }
        self.inner.tally(poll_id).await
    }

    async fn insert_chunk(&self, poll_id: &str, entries: &[BatchEntry]) -> Result<u64, StorageError> {
        self.inner.insert_chunk(poll_id, entries).await
    }
}

/// Ledger whose `insert_chunk` fails on the given 1-based call.
pub struct FailingChunkLedger {
    inner: Arc<Database>,
    fail_on: usize,
    calls: AtomicUsize,
}

impl FailingChunkLedger {
    pub fn new(inner: Arc<Database>, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VoteLedger for FailingChunkLedger {
    async fn record_ballot(
        &self,
        poll_id: &str,
        option_ids: &[String],
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vec<Vote>, StorageError> {
        self.inner.record_ballot(poll_id, option_ids, identity, mode).await
    }

    async fn list_votes(
        &self,
        poll_id: &str,
        identity: &VoterIdentity,
    ) -> Result<Vec<Vote>, StorageError> {
        self.inner.list_votes(poll_id, identity).await
    }

    async fn delete_votes(&self, poll_id: &str, scope: DeleteScope<'_>) -> Result<u64, StorageError> {
        self.inner.delete_votes(poll_id, scope).await
    }

    async fn tally(&self, poll_id: &str) -> Result<Vec<OptionTally>, StorageError> {
        self.inner.tally(poll_id).await
    }

    async fn insert_chunk(&self, poll_id: &str, entries: &[BatchEntry]) -> Result<u64, StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(transient());
        }
        self.inner.insert_chunk(poll_id, entries).await
    }
}

pub struct FailingNotifier;

#[async_trait]
impl ResultsNotifier for FailingNotifier {
    async fn results_changed(&self, _poll_id: &str) -> Result<(), NotifyError> {
        Err(NotifyError("subscriber gone".into()))
    }
}

/// A key-value store that is always down.
pub struct DownKv;

#[async_trait]
impl KvStore for DownKv {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(KvError::Unavailable("connection refused".into()))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
        Err(KvError::Unavailable("connection refused".into()))
    }

    async fn counter(&self, _key: &str) -> Result<Option<Counter>, KvError> {
        Err(KvError::Unavailable("connection refused".into()))
    }

    async fn incr_with_expiry(&self, _key: &str, _window: Duration) -> Result<Counter, KvError> {
        Err(KvError::Unavailable("connection refused".into()))
    }
}
