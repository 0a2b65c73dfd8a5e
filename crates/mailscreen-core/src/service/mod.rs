//! Service layer: drivers that compose the repositories, the Gmail client,
//! and the outbound boundaries into the pipeline's operations.

mod auth_expiry;
mod authorize;
mod delivery;
mod jobs;
mod operator;
mod screening;
mod watch;

pub use delivery::{DeliveryOutcome, DeliverySummary, delivery_window};
pub use operator::GmailOperatorNotifier;
pub use watch::SweepSummary;

use mailscreen_oauth::TokenClient;
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::config::{AppConfig, GoogleConfig};
use crate::limbo::LimboRepository;
use crate::notify::{OperatorNotice, OperatorNotifier};
use crate::rules::{DomainRuleRepository, SenderRuleRepository};
use crate::screener::ScreenerRepository;
use crate::user::UserRepository;

/// The assembled screening pipeline: repositories over one database,
/// the token client, deployment configuration, and the operator channel.
pub struct Pipeline<N> {
    /// User storage and watermark bookkeeping.
    pub users: UserRepository,
    /// Per-sender rules.
    pub senders: SenderRuleRepository,
    /// Per-domain rules.
    pub domains: DomainRuleRepository,
    /// Limbo staging.
    pub limbo: LimboRepository,
    /// Screener rows.
    pub screeners: ScreenerRepository,
    /// Token refresh client.
    pub token_client: TokenClient,
    /// Google deployment configuration.
    pub google: GoogleConfig,
    /// Product deployment configuration.
    pub app: AppConfig,
    /// Operator notification channel.
    pub notifier: N,
    pub(crate) gmail_base_url: Option<String>,
}

impl<N: OperatorNotifier> Pipeline<N> {
    /// Assembles a pipeline over one database pool, initializing every
    /// repository's schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub async fn new(
        pool: SqlitePool,
        token_client: TokenClient,
        google: GoogleConfig,
        app: AppConfig,
        notifier: N,
    ) -> Result<Self> {
        Ok(Self {
            users: UserRepository::with_pool(pool.clone()).await?,
            senders: SenderRuleRepository::with_pool(pool.clone()).await?,
            domains: DomainRuleRepository::with_pool(pool.clone()).await?,
            limbo: LimboRepository::with_pool(pool.clone()).await?,
            screeners: ScreenerRepository::with_pool(pool).await?,
            token_client,
            google,
            app,
            notifier,
            gmail_base_url: None,
        })
    }

    /// Overrides the Gmail API base URL. Used by tests against a local server.
    #[must_use]
    pub fn with_gmail_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.gmail_base_url = Some(base_url.into());
        self
    }

    /// Best-effort operator alert. A failing notification channel must not
    /// take down the run it is reporting on.
    pub(crate) async fn alert(&self, subject: &str, body: String) {
        let notice = OperatorNotice::error(subject, body);
        if let Err(err) = self.notifier.notify(&notice).await {
            warn!(subject, %err, "failed to dispatch operator alert");
        }
    }
}
