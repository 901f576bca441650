pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod rewards;

use std::sync::Arc;
use std::time::Duration;
use actix_web::HttpResponse;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use crate::config::Settings;

pub use auth::{AuthService, RateLimiter, RateLimitConfig, Session};
pub use db::{DbOperations, MemoryRewardStore, RewardStore};
pub use rewards::RewardService;

use crate::config::StorageBackend;
use rewards::SystemClock;

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn RewardStore>,
    pub auth_service: Arc<AuthService>,
    pub rewards: Arc<RewardService>,
}

impl AppState {
    /// Connects the configured storage backend and wires the services.
    pub async fn new(config: Settings) -> Result<Self> {
        let store: Arc<dyn RewardStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let db = DbOperations::new_with_options(
                    &config.database.url,
                    config.database.max_connections,
                    Duration::from_secs(config.database.acquire_timeout_secs),
                )
                .await
                .map_err(|e| AppError::DatabaseError(error::DatabaseError::ConnectionError(e.to_string())))?;

                if config.database.run_migrations {
                    db.run_migrations().await?;
                }
                Arc::new(db)
            }
            StorageBackend::Memory => {
                info!("Using in-memory reward store; data will not survive a restart");
                Arc::new(MemoryRewardStore::new())
            }
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Settings, store: Arc<dyn RewardStore>) -> Self {
        let auth_service = Arc::new(AuthService::from_config(&config.auth));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config.rate_limit)));
        let rewards = Arc::new(RewardService::new(
            store.clone(),
            Arc::new(SystemClock),
            rate_limiter,
            config.rewards.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            auth_service,
            rewards,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.store.close().await;
        Ok(())
    }
}
