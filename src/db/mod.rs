//! Database module for the rewards server
//!
//! Two interchangeable [`RewardStore`] backends: [`DbOperations`] on
//! Postgres and [`MemoryRewardStore`] for tests and local runs.

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

pub use memory::MemoryRewardStore;
pub use models::{
    IssuedRedemption, NewReward, Redemption, RedemptionRequest, RedemptionStatus, Reward,
    RewardCategory, RewardPatch, RewardStatus, UNLIMITED_QUANTITY,
};
pub use operations::DbOperations;
pub use store::RewardStore;
