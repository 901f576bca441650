use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{IssuedRedemption, Redemption, RedemptionRequest, Reward, RewardPatch};
use crate::Result;

/// Persistence for rewards, redemptions and point balances.
///
/// Implementations must make [`RewardStore::redeem`] and
/// [`RewardStore::mark_redemption_used`] atomic: the eligibility checks and
/// the writes they guard happen as one step, so concurrent callers can never
/// oversell a reward, overdraw a balance, or use a code twice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardStore: Send + Sync {
    /// Every reward, newest first.
    async fn list_rewards(&self) -> Result<Vec<Reward>>;

    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>>;

    async fn get_rewards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Reward>>;

    async fn create_reward(&self, reward: &Reward) -> Result<Reward>;

    /// Applies `patch` under the same lock as concurrent redemptions, so a
    /// quantity decrement is never lost to a stale write.
    async fn update_reward(&self, id: Uuid, patch: &RewardPatch, now: DateTime<Utc>) -> Result<Reward>;

    /// Missing balances read as zero.
    async fn points_balance(&self, user_id: Uuid) -> Result<i64>;

    /// Fails with `RewardNotFound`, `RewardUnavailable` or
    /// `InsufficientBalance` without side effects, and with
    /// `DatabaseError::Duplicate` when the code is already taken.
    async fn redeem(&self, request: &RedemptionRequest) -> Result<IssuedRedemption>;

    /// The user's redemptions, most recent first.
    async fn list_redemptions_for_user(&self, user_id: Uuid) -> Result<Vec<Redemption>>;

    async fn find_redemption_by_code(&self, code: &str) -> Result<Option<Redemption>>;

    /// Flips `is_used` exactly once. Fails with `RedemptionNotFound`,
    /// `AlreadyUsed`, or `Expired` (only when `allow_expired` is false).
    async fn mark_redemption_used(
        &self,
        id: Uuid,
        used_by: Uuid,
        now: DateTime<Utc>,
        allow_expired: bool,
    ) -> Result<Redemption>;

    async fn close(&self) {}
}
