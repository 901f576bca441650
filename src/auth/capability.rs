use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Privileges checked at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Spend own points, read own history and balance.
    RedeemRewards,
    /// Create, update and list every reward.
    ManageRewards,
    /// Look up codes and mark them used.
    VerifyRedemptions,
}

impl Role {
    pub fn grants(self, capability: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::User => matches!(capability, Capability::RedeemRewards),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::RedeemRewards => "redeem_rewards",
            Capability::ManageRewards => "manage_rewards",
            Capability::VerifyRedemptions => "verify_redemptions",
        };
        f.write_str(name)
    }
}
