use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::error::StorageError;
use crate::ledger::{DeleteScope, OptionTally, VoteLedger, WriteMode};
use crate::models::{BatchEntry, Vote, VoterIdentity};

const VOTE_COLUMNS: &str = "id, poll_id, option_id, user_id, fingerprint, created_at, updated_at";

// The conflict targets name the partial unique indexes from the schema, one
// per identity kind, so the upsert only ever matches a voter's own row.
const UPSERT_BY_USER: &str = r#"
    INSERT INTO votes (id, poll_id, option_id, user_id, fingerprint, exclusive, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, 1, ?, ?)
    ON CONFLICT (poll_id, user_id) WHERE exclusive = 1 AND user_id IS NOT NULL
    DO UPDATE SET option_id = excluded.option_id, updated_at = excluded.updated_at
    RETURNING id, poll_id, option_id, user_id, fingerprint, created_at, updated_at
"#;

const UPSERT_BY_FINGERPRINT: &str = r#"
    INSERT INTO votes (id, poll_id, option_id, user_id, fingerprint, exclusive, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, 1, ?, ?)
    ON CONFLICT (poll_id, fingerprint) WHERE exclusive = 1 AND fingerprint IS NOT NULL
    DO UPDATE SET option_id = excluded.option_id, updated_at = excluded.updated_at
    RETURNING id, poll_id, option_id, user_id, fingerprint, created_at, updated_at
"#;

const INSERT_ADDITIVE: &str = r#"
    INSERT INTO votes (id, poll_id, option_id, user_id, fingerprint, exclusive, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, 0, ?, ?)
    RETURNING id, poll_id, option_id, user_id, fingerprint, created_at, updated_at
"#;

fn identity_column(identity: &VoterIdentity) -> (&'static str, &str) {
    match identity {
        VoterIdentity::Authenticated(user_id) => ("user_id", user_id),
        VoterIdentity::Anonymous(fingerprint) => ("fingerprint", fingerprint),
    }
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote, StorageError> {
    let id: String = row.try_get("id")?;
    let user_id: Option<String> = row.try_get("user_id")?;
    let fingerprint: Option<String> = row.try_get("fingerprint")?;

    let identity = match (user_id, fingerprint) {
        (Some(user_id), _) => VoterIdentity::Authenticated(user_id),
        (None, Some(fingerprint)) => VoterIdentity::Anonymous(fingerprint),
        (None, None) => return Err(StorageError::MissingIdentity(id)),
    };

    Ok(Vote {
        id,
        poll_id: row.try_get("poll_id")?,
        option_id: row.try_get("option_id")?,
        identity,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

async fn write_vote(
    conn: &mut SqliteConnection,
    poll_id: &str,
    option_id: &str,
    identity: &VoterIdentity,
    mode: WriteMode,
    now: DateTime<Utc>,
) -> Result<Vote, StorageError> {
    let sql = match (mode, identity) {
        (WriteMode::Additive, _) => INSERT_ADDITIVE,
        (WriteMode::Exclusive, VoterIdentity::Authenticated(_)) => UPSERT_BY_USER,
        (WriteMode::Exclusive, VoterIdentity::Anonymous(_)) => UPSERT_BY_FINGERPRINT,
    };

    let row = sqlx::query(sql)
        .bind(Uuid::new_v4().to_string())
        .bind(poll_id)
        .bind(option_id)
        .bind(identity.user_id())
        .bind(identity.fingerprint())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

    vote_from_row(&row)
}

#[async_trait]
impl VoteLedger for Database {
    async fn record_ballot(
        &self,
        poll_id: &str,
        option_ids: &[String],
        identity: &VoterIdentity,
        mode: WriteMode,
    ) -> Result<Vec<Vote>, StorageError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut votes = Vec::with_capacity(option_ids.len());
        for option_id in option_ids {
            votes.push(write_vote(&mut tx, poll_id, option_id, identity, mode, now).await?);
        }

        // Dropping the transaction on an early return rolls it back.
        tx.commit().await?;
        Ok(votes)
    }

    async fn list_votes(
        &self,
        poll_id: &str,
        identity: &VoterIdentity,
    ) -> Result<Vec<Vote>, StorageError> {
        let (column, value) = identity_column(identity);
        let sql = format!(
            "SELECT {} FROM votes WHERE poll_id = ? AND {} = ? ORDER BY created_at, rowid",
            VOTE_COLUMNS, column
        );

        sqlx::query(&sql)
            .bind(poll_id)
            .bind(value)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(vote_from_row)
            .collect()
    }

    async fn delete_votes(&self, poll_id: &str, scope: DeleteScope<'_>) -> Result<u64, StorageError> {
        let result = match scope {
            DeleteScope::All => {
                sqlx::query("DELETE FROM votes WHERE poll_id = ?")
                    .bind(poll_id)
                    .execute(&self.pool)
                    .await?
            }
            DeleteScope::Voter(identity) => {
                let (column, value) = identity_column(identity);
                let sql = format!("DELETE FROM votes WHERE poll_id = ? AND {} = ?", column);
                sqlx::query(&sql)
                    .bind(poll_id)
                    .bind(value)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn tally(&self, poll_id: &str) -> Result<Vec<OptionTally>, StorageError> {
        sqlx::query(
            r#"
            SELECT o.id AS option_id, o.position AS position, COUNT(v.id) AS votes
            FROM poll_options o
            LEFT JOIN votes v ON v.option_id = o.id AND v.poll_id = o.poll_id
            WHERE o.poll_id = ?
            GROUP BY o.id, o.position
            ORDER BY o.position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<OptionTally, StorageError> {
            let votes: i64 = row.try_get("votes")?;
            Ok(OptionTally {
                option_id: row.try_get("option_id")?,
                ordinal: row.try_get("position")?,
                votes: votes.max(0) as u64,
            })
        })
        .collect()
    }

    async fn insert_chunk(&self, poll_id: &str, entries: &[BatchEntry]) -> Result<u64, StorageError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            write_vote(&mut tx, poll_id, &entry.option_id, &entry.identity, WriteMode::Additive, now)
                .await?;
        }

        tx.commit().await?;
        Ok(entries.len() as u64)
    }
}
