use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Quantity sentinel meaning the reward never runs out.
pub const UNLIMITED_QUANTITY: i64 = -1;

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardCategory {
    Discount,
    Content,
    Certificate,
    Merchandise,
    Other,
}

impl RewardCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RewardCategory::Discount => "discount",
            RewardCategory::Content => "content",
            RewardCategory::Certificate => "certificate",
            RewardCategory::Merchandise => "merchandise",
            RewardCategory::Other => "other",
        }
    }
}

impl fmt::Display for RewardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discount" => Ok(RewardCategory::Discount),
            "content" => Ok(RewardCategory::Content),
            "certificate" => Ok(RewardCategory::Certificate),
            "merchandise" => Ok(RewardCategory::Merchandise),
            "other" => Ok(RewardCategory::Other),
            other => Err(AppError::ValidationError(format!("unknown reward category '{}'", other))),
        }
    }
}

/// Where a reward stands right now, evaluated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Inactive,
    Upcoming,
    Expired,
    OutOfStock,
    Available,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: RewardCategory,
    pub image_url: Option<String>,
    pub points_cost: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub quantity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reward {
    pub fn is_unlimited(&self) -> bool {
        self.quantity == UNLIMITED_QUANTITY
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> RewardStatus {
        if !self.is_active {
            RewardStatus::Inactive
        } else if self.valid_from.is_some_and(|from| now < from) {
            RewardStatus::Upcoming
        } else if self.valid_until.is_some_and(|until| now > until) {
            RewardStatus::Expired
        } else if !self.is_unlimited() && self.quantity <= 0 {
            RewardStatus::OutOfStock
        } else {
            RewardStatus::Available
        }
    }

    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == RewardStatus::Available
    }

    fn validate(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError("name must not be blank".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::ValidationError(format!(
                "name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }
        if self.points_cost <= 0 {
            return Err(AppError::ValidationError("points_cost must be positive".into()));
        }
        if self.quantity < UNLIMITED_QUANTITY {
            return Err(AppError::ValidationError(
                "quantity must be -1 (unlimited) or at least 0".into(),
            ));
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return Err(AppError::ValidationError(
                    "valid_from must not be after valid_until".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReward {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: RewardCategory,
    pub image_url: Option<String>,
    pub points_cost: i64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_quantity() -> i64 {
    UNLIMITED_QUANTITY
}

fn default_active() -> bool {
    true
}

impl NewReward {
    pub fn into_reward(self, now: DateTime<Utc>) -> Result<Reward, AppError> {
        let reward = Reward {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            category: self.category,
            image_url: self.image_url,
            points_cost: self.points_cost,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            quantity: self.quantity,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        };
        reward.validate()?;
        Ok(reward)
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. Absent fields are left alone; `null` clears nullable ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewardPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<RewardCategory>,
    #[serde(default, deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
    pub points_cost: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub quantity: Option<i64>,
    pub is_active: Option<bool>,
}

impl RewardPatch {
    /// Applies the patch in place. On validation failure `reward` is left untouched.
    pub fn apply(&self, reward: &mut Reward, now: DateTime<Utc>) -> Result<(), AppError> {
        let mut updated = reward.clone();
        if let Some(name) = &self.name {
            updated.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(category) = self.category {
            updated.category = category;
        }
        if let Some(image_url) = &self.image_url {
            updated.image_url = image_url.clone();
        }
        if let Some(points_cost) = self.points_cost {
            updated.points_cost = points_cost;
        }
        if let Some(valid_from) = self.valid_from {
            updated.valid_from = valid_from;
        }
        if let Some(valid_until) = self.valid_until {
            updated.valid_until = valid_until;
        }
        if let Some(quantity) = self.quantity {
            updated.quantity = quantity;
        }
        if let Some(is_active) = self.is_active {
            updated.is_active = is_active;
        }
        updated.validate()?;
        updated.updated_at = now;
        *reward = updated;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Active,
    Used,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Redemption {
    pub id: Uuid,
    pub reward_id: Uuid,
    pub user_id: Uuid,
    pub points_spent: i64,
    pub redemption_code: String,
    pub redeemed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<Uuid>,
}

impl Redemption {
    /// Builds a fresh, unused redemption with its expiry resolved.
    pub fn issue(request: &RedemptionRequest, points_spent: i64, valid_until: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reward_id: request.reward_id,
            user_id: request.user_id,
            points_spent,
            redemption_code: request.code.clone(),
            redeemed_at: request.now,
            expires_at: code_expiry(request.now, valid_until, request.code_validity),
            is_used: false,
            used_at: None,
            used_by: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Used wins over expired; expiry is never stored.
    pub fn status_at(&self, now: DateTime<Utc>) -> RedemptionStatus {
        if self.is_used {
            RedemptionStatus::Used
        } else if self.is_expired_at(now) {
            RedemptionStatus::Expired
        } else {
            RedemptionStatus::Active
        }
    }
}

/// A code lives for `validity` but never past the reward's own end date.
pub fn code_expiry(
    redeemed_at: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    validity: Duration,
) -> DateTime<Utc> {
    let default_expiry = redeemed_at + validity;
    match valid_until {
        Some(until) if until < default_expiry => until,
        _ => default_expiry,
    }
}

/// Everything a store needs to issue one redemption atomically.
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub user_id: Uuid,
    pub reward_id: Uuid,
    pub code: String,
    pub now: DateTime<Utc>,
    pub code_validity: Duration,
}

#[derive(Debug, Clone)]
pub struct IssuedRedemption {
    pub redemption: Redemption,
    pub remaining_points: i64,
}
