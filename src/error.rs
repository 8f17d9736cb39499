use thiserror::Error;

/// Failures of the poll store or the vote ledger.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("vote {0} has no voter identity")]
    MissingIdentity(String),

    #[error("unreadable stored value: {0}")]
    Corrupt(String),
}

// Primary SQLite result codes for a busy or locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl StorageError {
    /// Whether retrying the same operation has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    .unwrap_or(false),
                _ => false,
            },
            StorageError::MissingIdentity(_) | StorageError::Corrupt(_) => false,
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            StorageError::Database(sqlx::Error::Database(db)) => {
                matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation)
                    || db.message().contains("FOREIGN KEY constraint failed")
            }
            _ => false,
        }
    }

    /// Text that is safe to hand to a client.
    pub fn public_message(&self) -> &'static str {
        if self.is_foreign_key_violation() {
            "references a poll or option that does not exist"
        } else if self.is_transient() {
            "storage temporarily unavailable"
        } else {
            "storage error"
        }
    }
}

/// Failures of the key-value store behind the poll cache and rate limiter.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),

    #[error("value at {0} is not a counter")]
    NotACounter(String),

    #[error("expiry {0:?} is out of range")]
    TtlOutOfRange(std::time::Duration),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Unavailable(err.to_string())
    }
}

/// Client-facing outcome of a rejected or failed vote operation. The text of
/// every variant is safe to show to the voter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("Poll not found")]
    PollNotFound,

    #[error("This poll has expired")]
    Expired,

    #[error("Too many votes, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Your vote could not be saved right now, please try again")]
    Unavailable,

    #[error("Internal server error")]
    Internal,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
