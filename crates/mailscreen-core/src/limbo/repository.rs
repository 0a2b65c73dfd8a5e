//! Limbo storage repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row};

use super::model::{LimboDecision, LimboMessage};
use crate::Result;
use crate::rules::ScreenStatus;
use crate::user::UserId;

/// Repository for limbo storage and resolution.
#[derive(Debug, Clone)]
pub struct LimboRepository {
    pool: SqlitePool,
}

impl LimboRepository {
    /// Create a new repository with the given database path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Create a repository over an existing pool, initializing the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    /// Initialize database schema.
    ///
    /// No unique index on (user, message): the table is purged aggressively
    /// and the engine's per-message watermark guard prevents double-staging
    /// within a run.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS limbo_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                sender_email TEXT NOT NULL,
                from_name TEXT,
                message_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT,
                snippet TEXT NOT NULL DEFAULT '',
                email_date TEXT NOT NULL,
                decision TEXT NOT NULL DEFAULT 'undecided',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_limbo_user_sender
            ON limbo_messages(user_id, sender_email)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stage one message into limbo. Call only after the inbox label was
    /// successfully removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn stage(&self, message: &LimboMessage) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO limbo_messages
                (id, user_id, sender_email, from_name, message_id, thread_id,
                 subject, body, snippet, email_date, decision)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&message.id)
        .bind(message.user_id.as_str())
        .bind(&message.sender_email)
        .bind(&message.from_name)
        .bind(&message.message_id)
        .bind(&message.thread_id)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(&message.snippet)
        .bind(message.email_date.to_rfc3339())
        .bind(message.decision.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All undecided messages for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn undecided_for_user(&self, user_id: &UserId) -> Result<Vec<LimboMessage>> {
        let rows = sqlx::query(&format!(
            "{SELECT_LIMBO} WHERE user_id = ? AND decision = 'undecided' ORDER BY email_date DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_message).collect())
    }

    /// All decided (but not yet resolved) messages for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn decided_for_user(&self, user_id: &UserId) -> Result<Vec<LimboMessage>> {
        let rows = sqlx::query(&format!(
            "{SELECT_LIMBO} WHERE user_id = ? AND decision != 'undecided'"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_message).collect())
    }

    /// Number of distinct senders with undecided messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_distinct_undecided_senders(&self, user_id: &UserId) -> Result<u64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(DISTINCT sender_email) AS senders
            FROM limbo_messages
            WHERE user_id = ? AND decision = 'undecided'
            ",
        )
        .bind(user_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        #[allow(clippy::cast_sign_loss)]
        Ok(row.get::<i64, _>("senders") as u64)
    }

    /// Record the user's decision for every pending message of one sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn record_decision(
        &self,
        user_id: &UserId,
        sender_email: &str,
        decision: LimboDecision,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE limbo_messages
            SET decision = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = ? AND sender_email = ? AND decision = 'undecided'
            ",
        )
        .bind(decision.as_str())
        .bind(user_id.as_str())
        .bind(sender_email.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Commit one resolved batch: delete the limbo rows and upsert the
    /// matching sender rules, atomically.
    ///
    /// Callers mutate the remote mailbox first; this local commit only runs
    /// once that succeeded, which is what bounds the damage of a crash in
    /// between to a re-runnable remote mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is committed then.
    pub async fn resolve(
        &self,
        user_id: &UserId,
        batch: &[LimboMessage],
        status: ScreenStatus,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        let mut delete = QueryBuilder::new("DELETE FROM limbo_messages WHERE user_id = ");
        delete.push_bind(user_id.as_str());
        delete.push(" AND message_id IN (");
        let mut ids = delete.separated(", ");
        for message in batch {
            ids.push_bind(&message.message_id);
        }
        delete.push(")");
        delete.build().execute(&mut *tx).await?;

        let mut upsert =
            QueryBuilder::new("INSERT INTO sender_rules (user_id, email, from_name, screen_status) ");
        upsert.push_values(batch, |mut b, message| {
            b.push_bind(user_id.as_str())
                .push_bind(&message.sender_email)
                .push_bind(&message.from_name)
                .push_bind(status.as_str());
        });
        upsert.push(
            r"
            ON CONFLICT(user_id, email) DO UPDATE SET
                screen_status = excluded.screen_status,
                from_name = excluded.from_name,
                updated_at = CURRENT_TIMESTAMP
            ",
        );
        upsert.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete rows by provider message id. Used after a bulk inbox restore.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete_by_message_ids(
        &self,
        user_id: &UserId,
        message_ids: &[String],
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut delete = QueryBuilder::new("DELETE FROM limbo_messages WHERE user_id = ");
        delete.push_bind(user_id.as_str());
        delete.push(" AND message_id IN (");
        let mut ids = delete.separated(", ");
        for id in message_ids {
            ids.push_bind(id);
        }
        delete.push(")");
        delete.build().execute(&self.pool).await?;
        Ok(())
    }
}

const SELECT_LIMBO: &str = r"
    SELECT id, user_id, sender_email, from_name, message_id, thread_id,
           subject, body, snippet, email_date, decision
    FROM limbo_messages
";

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Option<LimboMessage> {
    let email_date: String = row.get("email_date");
    let email_date = DateTime::parse_from_rfc3339(&email_date)
        .ok()?
        .with_timezone(&Utc);
    Some(LimboMessage {
        id: row.get("id"),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        sender_email: row.get("sender_email"),
        from_name: row.get("from_name"),
        message_id: row.get("message_id"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        body: row.get("body"),
        snippet: row.get("snippet"),
        email_date,
        decision: LimboDecision::parse(row.get("decision")),
    })
}
