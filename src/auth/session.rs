use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

use crate::auth::{Capability, Role};
use crate::error::{AppError, AuthError};
use crate::AppState;

/// The authenticated caller of a single request.
///
/// Extracted from the `Authorization: Bearer <token>` header and passed
/// explicitly into every service call; nothing about the caller is kept in
/// global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub role: Role,
}

impl Session {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn requires(&self, capability: Capability) -> Result<(), AuthError> {
        if self.role.grants(capability) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(capability))
        }
    }
}

fn extract_session(req: &HttpRequest) -> Result<Session, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::InternalError("application state not configured".into()))?;

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    state.auth_service.validate_token(token.trim())
}

impl FromRequest for Session {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_session(req))
    }
}
