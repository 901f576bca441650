use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;
use tracing::error;

use crate::auth::Capability;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error(transparent)]
    RewardError(#[from] RewardError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// Stable machine-readable code sent alongside the message.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AuthError(AuthError::Forbidden(_)) => "FORBIDDEN",
            AppError::AuthError(AuthError::RateLimited) => "RATE_LIMITED",
            AppError::AuthError(_) => "UNAUTHORIZED",
            AppError::RewardError(e) => e.code(),
            AppError::DatabaseError(DatabaseError::NotFound) => "NOT_FOUND",
            AppError::DatabaseError(DatabaseError::Duplicate) => "CONFLICT",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Message safe to hand to the client. Internal failures are masked.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::MigrationError(err.to_string()))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::AuthError(AuthError::TokenExpired)
            }
            _ => AppError::AuthError(AuthError::InvalidToken),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed with internal error");
        }
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "code": self.error_code(),
                "message": self.public_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::MissingToken => StatusCode::UNAUTHORIZED,
                AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
                AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
                AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            },
            AppError::RewardError(e) => match e {
                RewardError::RewardNotFound | RewardError::RedemptionNotFound => {
                    StatusCode::NOT_FOUND
                }
                RewardError::RewardUnavailable
                | RewardError::InsufficientBalance
                | RewardError::AlreadyUsed
                | RewardError::Expired => StatusCode::CONFLICT,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(DatabaseError::Duplicate) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing capability: {0}")]
    Forbidden(Capability),

    #[error("Rate limited")]
    RateLimited,
}

/// Business-rule failures. The display strings are shown to end users as-is.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RewardError {
    #[error("reward not found")]
    RewardNotFound,

    #[error("redemption not found")]
    RedemptionNotFound,

    #[error("reward unavailable")]
    RewardUnavailable,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("redemption already used")]
    AlreadyUsed,

    #[error("redemption expired")]
    Expired,
}

impl RewardError {
    fn code(&self) -> &'static str {
        match self {
            RewardError::RewardNotFound => "REWARD_NOT_FOUND",
            RewardError::RedemptionNotFound => "REDEMPTION_NOT_FOUND",
            RewardError::RewardUnavailable => "REWARD_UNAVAILABLE",
            RewardError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            RewardError::AlreadyUsed => "ALREADY_USED",
            RewardError::Expired => "REDEMPTION_EXPIRED",
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            // 23505: unique_violation
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
                DatabaseError::Duplicate
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}
