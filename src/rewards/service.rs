use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{Capability, RateLimiter, Session};
use crate::config::RewardsConfig;
use crate::db::{
    NewReward, Redemption, RedemptionRequest, RedemptionStatus, Reward, RewardCategory,
    RewardPatch, RewardStatus, RewardStore,
};
use crate::error::{AppError, AuthError, DatabaseError, RewardError};
use crate::rewards::clock::Clock;
use crate::rewards::code;
use crate::Result;

/// Fresh codes drawn before giving up on a run of collisions.
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailableQuery {
    pub category: Option<RewardCategory>,
    pub status: Option<RewardStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewardView {
    #[serde(flatten)]
    pub reward: Reward,
    pub status: RewardStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedemptionView {
    #[serde(flatten)]
    pub redemption: Redemption,
    pub reward_name: Option<String>,
    pub reward_category: Option<RewardCategory>,
    pub status: RedemptionStatus,
}

/// Returned to the user right after a successful redemption.
#[derive(Debug, Clone, Serialize)]
pub struct RedemptionReceipt {
    pub redemption_id: Uuid,
    pub reward_id: Uuid,
    pub redemption_code: String,
    pub expires_at: DateTime<Utc>,
    pub points_spent: i64,
    pub remaining_points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointsBalance {
    pub user_id: Uuid,
    pub points: i64,
}

/// Reward catalog and redemption lifecycle.
///
/// Every public method takes the caller's [`Session`] and checks the
/// capability it needs before touching the store.
pub struct RewardService {
    store: Arc<dyn RewardStore>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    config: RewardsConfig,
}

impl RewardService {
    pub fn new(
        store: Arc<dyn RewardStore>,
        clock: Arc<dyn Clock>,
        rate_limiter: Arc<RateLimiter>,
        config: RewardsConfig,
    ) -> Self {
        Self {
            store,
            clock,
            rate_limiter,
            config,
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Forgets rate-limit windows that have gone idle. Returns how many were dropped.
    pub async fn sweep_rate_limits(&self) -> usize {
        self.rate_limiter.cleanup(self.clock.now()).await
    }

    pub async fn list_available(&self, query: &AvailableQuery) -> Result<Vec<RewardView>> {
        let wanted = query.status.unwrap_or(RewardStatus::Available);
        if wanted == RewardStatus::Inactive {
            return Err(AppError::ValidationError(
                "inactive rewards are not listed publicly".into(),
            ));
        }

        let now = self.clock.now();
        let mut views: Vec<RewardView> = self
            .store
            .list_rewards()
            .await?
            .into_iter()
            .filter(|r| query.category.map_or(true, |c| r.category == c))
            .map(|reward| RewardView { status: reward.status_at(now), reward })
            .filter(|view| view.status == wanted)
            .collect();

        views.sort_by(|a, b| {
            a.reward
                .points_cost
                .cmp(&b.reward.points_cost)
                .then_with(|| a.reward.name.cmp(&b.reward.name))
        });
        Ok(views)
    }

    pub async fn list_all(&self, session: &Session) -> Result<Vec<RewardView>> {
        session.requires(Capability::ManageRewards)?;

        let now = self.clock.now();
        Ok(self
            .store
            .list_rewards()
            .await?
            .into_iter()
            .map(|reward| RewardView { status: reward.status_at(now), reward })
            .collect())
    }

    pub async fn create_reward(&self, session: &Session, new_reward: NewReward) -> Result<Reward> {
        session.requires(Capability::ManageRewards)?;

        let reward = new_reward.into_reward(self.clock.now())?;
        let reward = self.store.create_reward(&reward).await?;
        info!(
            admin_id = %session.user_id,
            reward_id = %reward.id,
            points_cost = reward.points_cost,
            quantity = reward.quantity,
            "Reward created"
        );
        Ok(reward)
    }

    pub async fn update_reward(&self, session: &Session, id: Uuid, patch: RewardPatch) -> Result<Reward> {
        session.requires(Capability::ManageRewards)?;

        let reward = self.store.update_reward(id, &patch, self.clock.now()).await?;
        info!(admin_id = %session.user_id, reward_id = %id, "Reward updated");
        Ok(reward)
    }

    pub async fn redeem(&self, session: &Session, reward_id: Uuid) -> Result<RedemptionReceipt> {
        session.requires(Capability::RedeemRewards)?;

        let now = self.clock.now();
        if !self.rate_limiter.check_rate_limit_at(session.user_id, now).await {
            warn!(user_id = %session.user_id, "Redemption rate limit exceeded");
            return Err(AuthError::RateLimited.into());
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let request = RedemptionRequest {
                user_id: session.user_id,
                reward_id,
                code: code::generate(),
                now,
                code_validity: Duration::days(self.config.code_validity_days),
            };

            match self.store.redeem(&request).await {
                Ok(issued) => {
                    let redemption = issued.redemption;
                    info!(
                        user_id = %session.user_id,
                        reward_id = %reward_id,
                        redemption_id = %redemption.id,
                        points_spent = redemption.points_spent,
                        "Reward redeemed"
                    );
                    return Ok(RedemptionReceipt {
                        redemption_id: redemption.id,
                        reward_id: redemption.reward_id,
                        redemption_code: redemption.redemption_code,
                        expires_at: redemption.expires_at,
                        points_spent: redemption.points_spent,
                        remaining_points: issued.remaining_points,
                    });
                }
                Err(AppError::DatabaseError(DatabaseError::Duplicate)) => {
                    warn!(attempt, reward_id = %reward_id, "Redemption code collision, regenerating");
                }
                Err(e) => {
                    info!(user_id = %session.user_id, reward_id = %reward_id, error = %e, "Redemption rejected");
                    return Err(e);
                }
            }
        }

        Err(AppError::InternalError(
            "could not generate a unique redemption code".into(),
        ))
    }

    pub async fn history(&self, session: &Session) -> Result<Vec<RedemptionView>> {
        session.requires(Capability::RedeemRewards)?;

        let redemptions = self.store.list_redemptions_for_user(session.user_id).await?;
        self.to_views(redemptions).await
    }

    pub async fn balance(&self, session: &Session) -> Result<PointsBalance> {
        session.requires(Capability::RedeemRewards)?;

        let points = self.store.points_balance(session.user_id).await?;
        Ok(PointsBalance {
            user_id: session.user_id,
            points,
        })
    }

    /// Read-only lookup; calling it repeatedly never changes anything.
    pub async fn verify(&self, session: &Session, raw_code: &str) -> Result<RedemptionView> {
        session.requires(Capability::VerifyRedemptions)?;

        let code = code::normalize(raw_code);
        if code.is_empty() {
            return Err(AppError::ValidationError("redemption code must not be empty".into()));
        }

        let redemption = self
            .store
            .find_redemption_by_code(&code)
            .await?
            .ok_or(RewardError::RedemptionNotFound)?;

        self.to_view(redemption).await
    }

    pub async fn mark_used(&self, session: &Session, redemption_id: Uuid) -> Result<RedemptionView> {
        session.requires(Capability::VerifyRedemptions)?;

        let now = self.clock.now();
        let redemption = self
            .store
            .mark_redemption_used(
                redemption_id,
                session.user_id,
                now,
                self.config.allow_expired_redemption,
            )
            .await
            .map_err(|e| {
                info!(redemption_id = %redemption_id, error = %e, "Mark-used rejected");
                e
            })?;

        if redemption.expires_at < now {
            warn!(redemption_id = %redemption_id, "Expired redemption marked used");
        }
        info!(admin_id = %session.user_id, redemption_id = %redemption_id, "Redemption marked used");
        self.to_view(redemption).await
    }

    async fn to_view(&self, redemption: Redemption) -> Result<RedemptionView> {
        let mut views = self.to_views(vec![redemption]).await?;
        views
            .pop()
            .ok_or_else(|| AppError::InternalError("redemption view missing".into()))
    }

    async fn to_views(&self, redemptions: Vec<Redemption>) -> Result<Vec<RedemptionView>> {
        let mut ids: Vec<Uuid> = redemptions.iter().map(|r| r.reward_id).collect();
        ids.sort();
        ids.dedup();

        let rewards: HashMap<Uuid, Reward> = self
            .store
            .get_rewards_by_ids(&ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let now = self.clock.now();
        Ok(redemptions
            .into_iter()
            .map(|redemption| {
                let reward = rewards.get(&redemption.reward_id);
                RedemptionView {
                    reward_name: reward.map(|r| r.name.clone()),
                    reward_category: reward.map(|r| r.category),
                    status: redemption.status_at(now),
                    redemption,
                }
            })
            .collect())
    }
}
