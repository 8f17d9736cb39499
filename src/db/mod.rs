use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::PollSource;
use crate::error::StorageError;
use crate::models::{Poll, PollOption, Visibility};

mod votes;

/// SQLite-backed poll store and vote ledger.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        // Create the database file on first start
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database gets its own empty
        // database, so those are pinned to one connection that never closes.
        let pool = if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        // Tables and indexes are created idempotently on every start
        Self::init_schema(&pool).await?;
        info!("Connected to {}", database_url);

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
        // Polls table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                creator_id TEXT NOT NULL,
                title TEXT NOT NULL,
                visibility TEXT NOT NULL,
                multiple_votes_allowed BOOLEAN NOT NULL,
                anonymous_allowed BOOLEAN NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Poll options table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // Exactly one of user_id / fingerprint is set. `exclusive` marks rows
        // written under a single-vote policy; only those are unique per voter.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                option_id TEXT NOT NULL,
                user_id TEXT,
                fingerprint TEXT,
                exclusive BOOLEAN NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK ((user_id IS NULL) <> (fingerprint IS NULL)),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE,
                FOREIGN KEY (option_id) REFERENCES poll_options(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One single-vote row per (poll, user) and per (poll, fingerprint)
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS votes_single_user
            ON votes (poll_id, user_id)
            WHERE exclusive = 1 AND user_id IS NOT NULL;
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS votes_single_fingerprint
            ON votes (poll_id, fingerprint)
            WHERE exclusive = 1 AND fingerprint IS NOT NULL;
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS votes_by_poll ON votes (poll_id, option_id);")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Stores a poll and its options. Poll management lives outside the
    /// voting core; this exists for seeding and administration.
    pub async fn create_poll(&self, poll: &Poll) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        // Insert the poll itself
        sqlx::query(
            r#"
            INSERT INTO polls (id, creator_id, title, visibility, multiple_votes_allowed, anonymous_allowed, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.creator_id)
        .bind(&poll.title)
        .bind(poll.visibility.as_str())
        .bind(poll.multiple_votes_allowed)
        .bind(poll.anonymous_allowed)
        .bind(poll.created_at)
        .bind(poll.expires_at)
        .execute(&mut *tx)
        .await?;

        // Insert its options, keeping their display order
        for option in &poll.options {
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, position, text)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&option.id)
            .bind(&poll.id)
            .bind(option.ordinal)
            .bind(&option.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>, StorageError> {
        let Some(poll_row) = sqlx::query(
            r#"
            SELECT id, creator_id, title, visibility, multiple_votes_allowed, anonymous_allowed, created_at, expires_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        // Decode the policy fields
        let visibility_str: String = poll_row.try_get("visibility")?;
        let visibility = Visibility::parse(&visibility_str)
            .ok_or_else(|| StorageError::Corrupt(format!("visibility {}", visibility_str)))?;

        // Options in display order
        let options = sqlx::query(
            r#"
            SELECT id, poll_id, position, text
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<PollOption, sqlx::Error> {
            Ok(PollOption {
                id: row.try_get("id")?,
                poll_id: row.try_get("poll_id")?,
                ordinal: row.try_get("position")?,
                text: row.try_get("text")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(Poll {
            id: poll_row.try_get("id")?,
            creator_id: poll_row.try_get("creator_id")?,
            title: poll_row.try_get("title")?,
            visibility,
            multiple_votes_allowed: poll_row.try_get("multiple_votes_allowed")?,
            anonymous_allowed: poll_row.try_get("anonymous_allowed")?,
            created_at: poll_row.try_get::<DateTime<Utc>, _>("created_at")?,
            expires_at: poll_row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
            options,
        }))
    }
}

#[async_trait]
impl PollSource for Database {
    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, StorageError> {
        self.get_poll(poll_id).await
    }
}
