use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{IssuedRedemption, Redemption, RedemptionRequest, Reward, RewardPatch};
use crate::db::store::RewardStore;
use crate::error::{DatabaseError, RewardError};
use crate::Result;

#[derive(Debug, Default)]
struct MemoryState {
    rewards: HashMap<Uuid, Reward>,
    redemptions: HashMap<Uuid, Redemption>,
    codes: HashMap<String, Uuid>,
    points: HashMap<Uuid, i64>,
}

/// In-process [`RewardStore`].
///
/// A single mutex guards all state, so every operation, including the
/// check-then-write inside [`RewardStore::redeem`], runs as one critical
/// section. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryRewardStore {
    state: Mutex<MemoryState>,
}

impl MemoryRewardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds points to a user's balance and returns the new total.
    /// Stands in for the platform's external earning events.
    pub async fn credit_points(&self, user_id: Uuid, amount: i64) -> i64 {
        let mut state = self.state.lock().await;
        let balance = state.points.entry(user_id).or_insert(0);
        *balance += amount;
        *balance
    }
}

#[async_trait]
impl RewardStore for MemoryRewardStore {
    async fn list_rewards(&self) -> Result<Vec<Reward>> {
        let state = self.state.lock().await;
        let mut rewards: Vec<Reward> = state.rewards.values().cloned().collect();
        rewards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rewards)
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>> {
        Ok(self.state.lock().await.rewards.get(&id).cloned())
    }

    async fn get_rewards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Reward>> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.rewards.get(id).cloned()).collect())
    }

    async fn create_reward(&self, reward: &Reward) -> Result<Reward> {
        let mut state = self.state.lock().await;
        if state.rewards.contains_key(&reward.id) {
            return Err(DatabaseError::Duplicate.into());
        }
        state.rewards.insert(reward.id, reward.clone());
        Ok(reward.clone())
    }

    async fn update_reward(&self, id: Uuid, patch: &RewardPatch, now: DateTime<Utc>) -> Result<Reward> {
        let mut state = self.state.lock().await;
        let reward = state.rewards.get_mut(&id).ok_or(RewardError::RewardNotFound)?;
        patch.apply(reward, now)?;
        Ok(reward.clone())
    }

    async fn points_balance(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.state.lock().await.points.get(&user_id).copied().unwrap_or(0))
    }

    async fn redeem(&self, request: &RedemptionRequest) -> Result<IssuedRedemption> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let reward = state
            .rewards
            .get_mut(&request.reward_id)
            .ok_or(RewardError::RewardNotFound)?;
        if !reward.is_redeemable_at(request.now) {
            return Err(RewardError::RewardUnavailable.into());
        }

        let balance = state.points.get(&request.user_id).copied().unwrap_or(0);
        if balance < reward.points_cost {
            return Err(RewardError::InsufficientBalance.into());
        }
        if state.codes.contains_key(&request.code) {
            return Err(DatabaseError::Duplicate.into());
        }

        // All checks passed; nothing below can fail.
        if !reward.is_unlimited() {
            reward.quantity -= 1;
        }
        let remaining_points = balance - reward.points_cost;
        state.points.insert(request.user_id, remaining_points);

        let redemption = Redemption::issue(request, reward.points_cost, reward.valid_until);
        state.codes.insert(redemption.redemption_code.clone(), redemption.id);
        state.redemptions.insert(redemption.id, redemption.clone());

        Ok(IssuedRedemption {
            redemption,
            remaining_points,
        })
    }

    async fn list_redemptions_for_user(&self, user_id: Uuid) -> Result<Vec<Redemption>> {
        let state = self.state.lock().await;
        let mut redemptions: Vec<Redemption> = state
            .redemptions
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        redemptions.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at));
        Ok(redemptions)
    }

    async fn find_redemption_by_code(&self, code: &str) -> Result<Option<Redemption>> {
        let state = self.state.lock().await;
        Ok(state
            .codes
            .get(code)
            .and_then(|id| state.redemptions.get(id))
            .cloned())
    }

    async fn mark_redemption_used(
        &self,
        id: Uuid,
        used_by: Uuid,
        now: DateTime<Utc>,
        allow_expired: bool,
    ) -> Result<Redemption> {
        let mut state = self.state.lock().await;
        let redemption = state
            .redemptions
            .get_mut(&id)
            .ok_or(RewardError::RedemptionNotFound)?;

        if redemption.is_used {
            return Err(RewardError::AlreadyUsed.into());
        }
        if !allow_expired && redemption.is_expired_at(now) {
            return Err(RewardError::Expired.into());
        }

        redemption.is_used = true;
        redemption.used_at = Some(now);
        redemption.used_by = Some(used_by);
        Ok(redemption.clone())
    }
}
