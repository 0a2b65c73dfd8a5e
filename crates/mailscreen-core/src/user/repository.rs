//! User storage repository.
//!
//! Owns the only write path for the history watermark:
//! [`UserRepository::advance_watermark`] is the single commit point, and the
//! monotonic guard lives in the SQL itself so overlapping runs can race it
//! safely.

use chrono::{DateTime, Duration, Timelike, Utc};
use mailscreen_oauth::AccessToken;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use super::model::{User, UserId};
use crate::Result;
use crate::config::WATCH_RENEWAL_WINDOW_DAYS;

/// Repository for user storage and watermark bookkeeping.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
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
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                gmail_id TEXT UNIQUE,
                refresh_token TEXT,
                refresh_token_expire_at TEXT,
                access_token TEXT,
                access_token_expire_at TEXT,
                watch_expire_at TEXT,
                history_id INTEGER,
                timezone TEXT,
                daily_screener_time TEXT,
                is_daily_screener_on INTEGER NOT NULL DEFAULT 0,
                has_completed_onboarding INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Sweeps query by these expiries
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_users_refresh_token_expire_at
            ON users(refresh_token_expire_at)
            ",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_users_watch_expire_at
            ON users(watch_expire_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (
                id, email, gmail_id,
                refresh_token, refresh_token_expire_at,
                access_token, access_token_expire_at,
                watch_expire_at, history_id,
                timezone, daily_screener_time,
                is_daily_screener_on, has_completed_onboarding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.gmail_id)
        .bind(&user.refresh_token)
        .bind(user.refresh_token_expire_at.map(|d| d.to_rfc3339()))
        .bind(&user.access_token)
        .bind(user.access_token_expire_at.map(|d| d.to_rfc3339()))
        .bind(user.watch_expire_at.map(|d| d.to_rfc3339()))
        .bind(user.history_id.map(|h| h as i64))
        .bind(&user.timezone)
        .bind(&user.daily_screener_time)
        .bind(user.is_daily_screener_on)
        .bind(user.has_completed_onboarding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    /// Get a user by mailbox address (lowercased before lookup).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE email = ?"))
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    /// Advance the user's watermark to `to`.
    ///
    /// The single watermark commit point. Monotonic: a stored value at or
    /// past `to` is left untouched, so overlapping or replayed runs can call
    /// this freely. Returns whether the row actually moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn advance_watermark(&self, id: &UserId, to: u64) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET history_id = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND (history_id IS NULL OR history_id < ?)
            ",
        )
        .bind(to as i64)
        .bind(id.as_str())
        .bind(to as i64)
        .execute(&self.pool)
        .await?;
        let moved = result.rows_affected() > 0;
        if moved {
            debug!(user_id = %id, to, "advanced watermark");
        }
        Ok(moved)
    }

    /// Persist a freshly refreshed access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn store_access_token(&self, id: &UserId, token: &AccessToken) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET access_token = ?,
                access_token_expire_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(&token.token)
        .bind(token.expires_at.to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the user's authorization as revoked by stamping the refresh
    /// token expiry to now (truncated to the minute).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn mark_refresh_token_expired(&self, id: &UserId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET refresh_token_expire_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(start_of_minute(Utc::now()).to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the push subscription as expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn mark_watch_expired(&self, id: &UserId) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET watch_expire_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(start_of_minute(Utc::now()).to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful watch call: store the subscription expiry and
    /// advance the watermark to the watch response's history id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn record_watch(
        &self,
        id: &UserId,
        expire_at: DateTime<Utc>,
        history_id: u64,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET watch_expire_at = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            ",
        )
        .bind(expire_at.to_rfc3339())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        self.advance_watermark(id, history_id).await?;
        Ok(())
    }

    /// Users whose refresh token expires `days_left` days from now, within
    /// the last hour-aligned window. The sweep runs hourly, so the window
    /// guarantees exactly one warning per day mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn users_with_expiring_refresh_tokens(
        &self,
        now: DateTime<Utc>,
        days_left: i64,
    ) -> Result<Vec<User>> {
        let window_end = start_of_hour(now) + Duration::days(days_left);
        let window_start = window_end - Duration::hours(1);
        let rows = sqlx::query(&format!(
            r"
            {SELECT_USER}
            WHERE refresh_token IS NOT NULL
              AND refresh_token_expire_at BETWEEN ? AND ?
            "
        ))
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    /// Users whose refresh token expired within the last hour-aligned window.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn users_with_recently_expired_refresh_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<User>> {
        let window_end = start_of_hour(now);
        let window_start = window_end - Duration::hours(1);
        let rows = sqlx::query(&format!(
            r"
            {SELECT_USER}
            WHERE refresh_token IS NOT NULL
              AND refresh_token_expire_at BETWEEN ? AND ?
            "
        ))
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    /// Users with screening on whose push subscription expires within the
    /// renewal window (including already-expired subscriptions only when
    /// they expired after `now`).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn users_with_expiring_watch(&self, now: DateTime<Utc>) -> Result<Vec<User>> {
        let window_end = now + Duration::days(WATCH_RENEWAL_WINDOW_DAYS);
        let rows = sqlx::query(&format!(
            r"
            {SELECT_USER}
            WHERE refresh_token IS NOT NULL
              AND is_daily_screener_on = 1
              AND watch_expire_at BETWEEN ? AND ?
            "
        ))
        .bind(now.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }
}

const SELECT_USER: &str = r"
    SELECT id, email, gmail_id,
           refresh_token, refresh_token_expire_at,
           access_token, access_token_expire_at,
           watch_expire_at, history_id,
           timezone, daily_screener_time,
           is_daily_screener_on, has_completed_onboarding
    FROM users
";

fn start_of_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn start_of_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    start_of_minute(dt).with_minute(0).unwrap_or(dt)
}

fn parse_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    })
}

/// Convert a database row to a User.
#[allow(clippy::cast_sign_loss)]
fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        id: UserId::new(row.get::<String, _>("id")),
        email: row.get("email"),
        gmail_id: row.get("gmail_id"),
        refresh_token: row.get("refresh_token"),
        refresh_token_expire_at: parse_datetime(row.get("refresh_token_expire_at")),
        access_token: row.get("access_token"),
        access_token_expire_at: parse_datetime(row.get("access_token_expire_at")),
        watch_expire_at: parse_datetime(row.get("watch_expire_at")),
        history_id: row.get::<Option<i64>, _>("history_id").map(|h| h as u64),
        timezone: row.get("timezone"),
        daily_screener_time: row.get("daily_screener_time"),
        is_daily_screener_on: row.get::<i64, _>("is_daily_screener_on") != 0,
        has_completed_onboarding: row.get::<i64, _>("has_completed_onboarding") != 0,
    }
}
