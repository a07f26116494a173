//! Shared application state handed to every handler.

use std::{sync::Arc, time::Instant};

use axum::extract::FromRef;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    services::{
        ai_client::AiClient, cloud_storage::CloudStorage, mail_service::Mailer,
        rate_limiter::RateLimiter,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
    pub mailer: Mailer,
    pub ai: AiClient,
    /// `None` when Cloudinary credentials are not configured.
    pub storage: Option<CloudStorage>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Result<Self, AppError> {
        let mailer = Mailer::from_config(config.email())?;
        let ai = AiClient::new(config.ai_service_url.clone())?;
        let storage = config.cloudinary().map(CloudStorage::new).transpose()?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::new()),
            mailer,
            ai,
            storage,
            started_at: Instant::now(),
        })
    }

    /// Cloudinary client, or 503 when it is not configured.
    pub fn storage(&self) -> Result<&CloudStorage, AppError> {
        self.storage
            .as_ref()
            .ok_or(AppError::NotConfigured("Cloud storage"))
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

#[cfg(test)]
impl AppState {
    /// State over a pool that never connects, for tests that stop before SQL.
    pub fn for_tests() -> Self {
        let config = Config::for_tests();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy(&config.database_url)
            .expect("test database URL parses");

        Self::new(pool, config).expect("test state builds")
    }
}
