//! Reward catalog and redemption-code lifecycle
//!
//! A redemption is issued `active`, becomes `used` once an admin marks it,
//! and reads as `expired` once its expiry has passed without use. Expiry is
//! derived from the clock and never stored.

pub mod clock;
pub mod code;
pub mod handlers;
mod service;

pub use clock::{Clock, SystemClock};
pub use handlers::configure;
pub use service::{
    AvailableQuery, PointsBalance, RedemptionReceipt, RedemptionView, RewardService, RewardView,
};
