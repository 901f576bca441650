//! Authentication and authorization for the rewards server
//!
//! Bearer tokens are validated into an explicit [`Session`] per request.
//! Every service entry point that needs privileges calls
//! [`Session::requires`] with a [`Capability`]; roles map to capabilities
//! in exactly one place, [`Role::grants`].

mod capability;
mod rate_limit;
mod service;
mod session;

pub use capability::{Capability, Role};
pub use rate_limit::{RateLimiter, RateLimitConfig};
pub use service::{AuthService, Claims};
pub use session::Session;
