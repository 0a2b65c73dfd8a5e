//! Screener storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::model::{Screener, ScreenerStatus};
use crate::Result;
use crate::user::UserId;

/// Repository for screener rows and their status protocol.
#[derive(Debug, Clone)]
pub struct ScreenerRepository {
    pool: SqlitePool,
}

impl ScreenerRepository {
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
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS screeners (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                provider TEXT,
                provider_id TEXT,
                scheduled_at TEXT NOT NULL,
                sent_at TEXT,
                expire_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_screeners_user_status
            ON screeners(user_id, status)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get one screener by id, scoped to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, user_id: &UserId, screener_id: &str) -> Result<Option<Screener>> {
        let row = sqlx::query(&format!(
            "{SELECT_SCREENER} WHERE user_id = ? AND id = ?"
        ))
        .bind(user_id.as_str())
        .bind(screener_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().and_then(row_to_screener))
    }

    /// All `scheduled` rows for a user. The invariant says at most one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn scheduled_for_user(&self, user_id: &UserId) -> Result<Vec<Screener>> {
        let rows = sqlx::query(&format!(
            "{SELECT_SCREENER} WHERE user_id = ? AND status = 'scheduled'"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_screener).collect())
    }

    /// Schedule a screener, transactionally replacing any existing
    /// `scheduled` row for the user. Keeps the single-scheduled invariant
    /// even when called concurrently with itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is committed then.
    pub async fn replace_scheduled(&self, screener: &Screener) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM screeners WHERE user_id = ? AND status = 'scheduled'")
            .bind(screener.user_id.as_str())
            .execute(&mut *tx)
            .await?;
        insert_screener(&mut tx, screener).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Whether a screener link is valid for access: the row exists and has
    /// not expired, irrespective of its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_valid(
        &self,
        user_id: &UserId,
        screener_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT id FROM screeners
            WHERE id = ? AND user_id = ? AND expire_at > ?
            ",
        )
        .bind(screener_id)
        .bind(user_id.as_str())
        .bind(now.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Scheduled screeners due in `[window_start, window_end]` for users
    /// with screening on and a live (or indefinite) authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn due_between(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Screener>> {
        let rows = sqlx::query(
            r"
            SELECT s.id, s.user_id, s.status, s.provider, s.provider_id,
                   s.scheduled_at, s.sent_at, s.expire_at
            FROM screeners s
            INNER JOIN users u ON s.user_id = u.id
            WHERE s.status = 'scheduled'
              AND s.scheduled_at BETWEEN ? AND ?
              AND u.is_daily_screener_on = 1
              AND u.refresh_token IS NOT NULL
              AND (u.refresh_token_expire_at IS NULL OR u.refresh_token_expire_at > ?)
            ",
        )
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().filter_map(row_to_screener).collect())
    }

    /// Transition `scheduled` → `enqueued` before the send attempt.
    /// Returns whether the row was claimed; a second sweep loses the race.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn mark_enqueued(&self, user_id: &UserId, screener_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE screeners
            SET status = 'enqueued',
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND user_id = ? AND status = 'scheduled'
            ",
        )
        .bind(screener_id)
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Complete a send: mark the screener `sent` with its provider id and
    /// schedule the next occurrence, in one transaction. A crash mid-send
    /// leaves the row `enqueued`, which is visibly different from both
    /// "never attempted" and "done".
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is committed then.
    pub async fn mark_sent_and_replace_next(
        &self,
        user_id: &UserId,
        screener_id: &str,
        provider: &str,
        provider_id: &str,
        sent_at: DateTime<Utc>,
        next: &Screener,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            UPDATE screeners
            SET status = 'sent',
                provider = ?,
                provider_id = ?,
                sent_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND user_id = ? AND status = 'enqueued'
            ",
        )
        .bind(provider)
        .bind(provider_id)
        .bind(sent_at.to_rfc3339())
        .bind(screener_id)
        .bind(user_id.as_str())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM screeners WHERE user_id = ? AND status = 'scheduled'")
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;
        insert_screener(&mut tx, next).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_screener(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    screener: &Screener,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO screeners
            (id, user_id, status, provider, provider_id, scheduled_at, sent_at, expire_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&screener.id)
    .bind(screener.user_id.as_str())
    .bind(screener.status.as_str())
    .bind(&screener.provider)
    .bind(&screener.provider_id)
    .bind(screener.scheduled_at.to_rfc3339())
    .bind(screener.sent_at.map(|d| d.to_rfc3339()))
    .bind(screener.expire_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const SELECT_SCREENER: &str = r"
    SELECT id, user_id, status, provider, provider_id,
           scheduled_at, sent_at, expire_at
    FROM screeners
";

fn row_to_screener(row: &sqlx::sqlite::SqliteRow) -> Option<Screener> {
    let parse = |raw: String| {
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    };
    Some(Screener {
        id: row.get("id"),
        user_id: UserId::new(row.get::<String, _>("user_id")),
        status: ScreenerStatus::parse(row.get("status")),
        provider: row.get("provider"),
        provider_id: row.get("provider_id"),
        scheduled_at: parse(row.get("scheduled_at"))?,
        sent_at: row.get::<Option<String>, _>("sent_at").and_then(parse),
        expire_at: parse(row.get("expire_at"))?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::screener::ScreenerTimings;
    use crate::user::{User, UserRepository};
    use chrono::Duration;

    async fn repos() -> (ScreenerRepository, UserRepository) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let screeners = ScreenerRepository::with_pool(pool.clone()).await.unwrap();
        let users = UserRepository::with_pool(pool).await.unwrap();
        (screeners, users)
    }

    fn timings(now: DateTime<Utc>, minutes_ahead: i64) -> ScreenerTimings {
        let scheduled_at = now + Duration::minutes(minutes_ahead);
        ScreenerTimings {
            scheduled_at,
            expire_at: scheduled_at + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn test_single_scheduled_invariant() {
        let (screeners, _) = repos().await;
        let user = UserId::new("u1");
        let now = Utc::now();

        screeners
            .replace_scheduled(&Screener::scheduled(user.clone(), timings(now, 60)))
            .await
            .unwrap();
        screeners
            .replace_scheduled(&Screener::scheduled(user.clone(), timings(now, 120)))
            .await
            .unwrap();

        let scheduled = screeners.scheduled_for_user(&user).await.unwrap();
        assert_eq!(scheduled.len(), 1);
    }

    #[tokio::test]
    async fn test_is_valid_by_expiry_only() {
        let (screeners, _) = repos().await;
        let user = UserId::new("u1");
        let now = Utc::now();
        let screener = Screener::scheduled(user.clone(), timings(now, -60));
        screeners.replace_scheduled(&screener).await.unwrap();

        assert!(screeners.is_valid(&user, &screener.id, now).await.unwrap());
        assert!(
            !screeners
                .is_valid(&user, &screener.id, now + Duration::days(2))
                .await
                .unwrap()
        );
        assert!(!screeners.is_valid(&user, "missing", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_between_filters_users() {
        let (screeners, users) = repos().await;
        let now = Utc::now();

        let mut active = User::new(UserId::new("u-active"), "a@x.com");
        active.refresh_token = Some("rt".into());
        active.is_daily_screener_on = true;
        users.insert(&active).await.unwrap();

        let mut revoked = User::new(UserId::new("u-revoked"), "b@x.com");
        revoked.refresh_token = Some("rt".into());
        revoked.is_daily_screener_on = true;
        revoked.refresh_token_expire_at = Some(now - Duration::hours(1));
        users.insert(&revoked).await.unwrap();

        for user_id in ["u-active", "u-revoked"] {
            screeners
                .replace_scheduled(&Screener::scheduled(
                    UserId::new(user_id),
                    timings(now, -10),
                ))
                .await
                .unwrap();
        }

        let due = screeners
            .due_between(now - Duration::minutes(30), now, now)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, UserId::new("u-active"));
    }

    #[tokio::test]
    async fn test_send_protocol_transitions() {
        let (screeners, _) = repos().await;
        let user = UserId::new("u1");
        let now = Utc::now();
        let screener = Screener::scheduled(user.clone(), timings(now, -10));
        screeners.replace_scheduled(&screener).await.unwrap();

        assert!(screeners.mark_enqueued(&user, &screener.id).await.unwrap());
        // double-claim loses
        assert!(!screeners.mark_enqueued(&user, &screener.id).await.unwrap());

        let next = Screener::scheduled(user.clone(), timings(now, 1430));
        screeners
            .mark_sent_and_replace_next(&user, &screener.id, "gmail", "prov-1", now, &next)
            .await
            .unwrap();

        let sent = screeners.get(&user, &screener.id).await.unwrap().unwrap();
        assert_eq!(sent.status, ScreenerStatus::Sent);
        assert_eq!(sent.provider_id.as_deref(), Some("prov-1"));

        let scheduled = screeners.scheduled_for_user(&user).await.unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, next.id);
    }
}
