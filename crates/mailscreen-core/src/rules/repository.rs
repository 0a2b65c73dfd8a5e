//! Rule repositories for sender and domain overrides.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row};

use super::model::{DomainRule, ScreenStatus, SenderRule};
use crate::Result;
use crate::user::UserId;

/// Repository for per-sender screening rules.
#[derive(Debug, Clone)]
pub struct SenderRuleRepository {
    pool: SqlitePool,
}

impl SenderRuleRepository {
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
            CREATE TABLE IF NOT EXISTS sender_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                email TEXT NOT NULL,
                from_name TEXT,
                screen_status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, email)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_sender_rules_user_status
            ON sender_rules(user_id, screen_status)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the rule for one sender, if any. Email is lowercased for lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, user_id: &UserId, email: &str) -> Result<Option<SenderRule>> {
        let row = sqlx::query(
            r"
            SELECT user_id, email, from_name, screen_status
            FROM sender_rules
            WHERE user_id = ? AND email = ?
            ",
        )
        .bind(user_id.as_str())
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SenderRule {
            user_id: UserId::new(r.get::<String, _>("user_id")),
            email: r.get("email"),
            from_name: r.get("from_name"),
            status: ScreenStatus::parse(r.get("screen_status")),
        }))
    }

    /// Upsert rules for many senders, overriding any existing status.
    /// Last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_overriding(
        &self,
        user_id: &UserId,
        entries: &[(String, Option<String>)],
        status: ScreenStatus,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut builder =
            QueryBuilder::new("INSERT INTO sender_rules (user_id, email, from_name, screen_status) ");
        builder.push_values(entries, |mut b, (email, from_name)| {
            b.push_bind(user_id.as_str())
                .push_bind(email.to_lowercase())
                .push_bind(from_name.clone())
                .push_bind(status.as_str());
        });
        builder.push(
            r"
            ON CONFLICT(user_id, email) DO UPDATE SET
                screen_status = excluded.screen_status,
                from_name = excluded.from_name,
                updated_at = CURRENT_TIMESTAMP
            ",
        );
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert rules for many senders as `in`, preserving the status of any
    /// existing rule. Used by the onboarding backfill, which must never
    /// override a decision the user already made.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_preserving(
        &self,
        user_id: &UserId,
        entries: &[(String, Option<String>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut builder =
            QueryBuilder::new("INSERT INTO sender_rules (user_id, email, from_name, screen_status) ");
        builder.push_values(entries, |mut b, (email, from_name)| {
            b.push_bind(user_id.as_str())
                .push_bind(email.to_lowercase())
                .push_bind(from_name.clone())
                .push_bind(ScreenStatus::In.as_str());
        });
        builder.push(
            r"
            ON CONFLICT(user_id, email) DO UPDATE SET
                from_name = excluded.from_name,
                updated_at = CURRENT_TIMESTAMP
            ",
        );
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Delete the rule for one sender ("neither": back to unscreened).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete(&self, user_id: &UserId, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM sender_rules WHERE user_id = ? AND email = ?")
            .bind(user_id.as_str())
            .bind(email.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Repository for per-domain screening rules.
#[derive(Debug, Clone)]
pub struct DomainRuleRepository {
    pool: SqlitePool,
}

impl DomainRuleRepository {
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
            CREATE TABLE IF NOT EXISTS domain_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                screen_status TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, domain)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_domain_rules_user_status
            ON domain_rules(user_id, screen_status)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the rule for one domain, if any. Domain is lowercased for lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, user_id: &UserId, domain: &str) -> Result<Option<DomainRule>> {
        let row = sqlx::query(
            r"
            SELECT user_id, domain, screen_status
            FROM domain_rules
            WHERE user_id = ? AND domain = ?
            ",
        )
        .bind(user_id.as_str())
        .bind(domain.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DomainRule {
            user_id: UserId::new(r.get::<String, _>("user_id")),
            domain: r.get("domain"),
            status: ScreenStatus::parse(r.get("screen_status")),
        }))
    }

    /// Upsert the rule for one domain. Last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert(
        &self,
        user_id: &UserId,
        domain: &str,
        status: ScreenStatus,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO domain_rules (user_id, domain, screen_status)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, domain) DO UPDATE SET
                screen_status = excluded.screen_status,
                updated_at = CURRENT_TIMESTAMP
            ",
        )
        .bind(user_id.as_str())
        .bind(domain.to_lowercase())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the rule for one domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn delete(&self, user_id: &UserId, domain: &str) -> Result<()> {
        sqlx::query("DELETE FROM domain_rules WHERE user_id = ? AND domain = ?")
            .bind(user_id.as_str())
            .bind(domain.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
