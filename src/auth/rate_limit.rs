use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Utc, Duration};
use uuid::Uuid;

use crate::config::RateLimitSettings;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_size: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: Duration::minutes(1),
            max_requests: 10,
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            window_size: Duration::seconds(settings.window_seconds),
            max_requests: settings.max_redemptions,
        }
    }
}

#[derive(Debug)]
struct RequestWindow {
    timestamps: Vec<DateTime<Utc>>,
}

impl RequestWindow {
    fn new() -> Self {
        Self {
            timestamps: Vec::new(),
        }
    }

    fn cleanup_old_requests(&mut self, now: DateTime<Utc>, window_size: Duration) {
        let cutoff = now - window_size;
        self.timestamps.retain(|ts| *ts > cutoff);
    }
}

/// Sliding-window limiter keyed by user.
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<Uuid, RequestWindow>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Records a request at `now` if the user is under the limit.
    /// Rejected requests are not recorded. A disabled limiter admits everything
    /// and tracks nothing.
    pub async fn check_rate_limit_at(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut windows = self.windows.write().await;
        let window = windows.entry(user_id).or_insert_with(RequestWindow::new);
        window.cleanup_old_requests(now, self.config.window_size);

        if window.timestamps.len() < self.config.max_requests as usize {
            window.timestamps.push(now);
            true
        } else {
            false
        }
    }

    /// Drops windows with no requests left inside the window ending at `now`.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.write().await;
        let before = windows.len();

        windows.retain(|_, window| {
            window.cleanup_old_requests(now, self.config.window_size);
            !window.timestamps.is_empty()
        });

        before - windows.len()
    }

    pub async fn tracked_users(&self) -> usize {
        self.windows.read().await.len()
    }
}
