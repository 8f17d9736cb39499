pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod identity;
pub mod kv;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod results;
pub mod tasks;

pub use batch::BatchProcessor;
pub use cache::{PollCache, PollSource};
pub use config::Config;
pub use coordinator::{Collaborators, RetryPolicy, VoteCoordinator};
pub use db::Database;
pub use error::{StorageError, VoteError};
pub use ledger::VoteLedger;
pub use notify::{BroadcastNotifier, ResultsNotifier};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use results::ResultsAggregator;
