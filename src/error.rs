use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy for the booking core. Every variant maps to a stable
/// machine-readable code so clients can tell a lost slot (refetch the slot
/// list) from an insufficient loyalty balance (hide the redemption toggle).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not allowed for this account")]
    Forbidden,

    #[error("the requested slot is no longer available")]
    Conflict,

    #[error("loyalty balance is below the redemption threshold")]
    InsufficientBalance,

    #[error("illegal status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("the schedule is busy, please retry")]
    Busy,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        DomainError::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::NotFound(_) => "not_found",
            DomainError::Forbidden => "forbidden",
            DomainError::Conflict => "conflict",
            DomainError::InsufficientBalance => "insufficient_balance",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::Busy => "busy",
            DomainError::Database(_) => "internal",
        }
    }
}

impl ResponseError for DomainError {
    fn status_code(&self) -> StatusCode {
        match self {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Forbidden => StatusCode::FORBIDDEN,
            DomainError::Conflict | DomainError::InsufficientBalance => StatusCode::CONFLICT,
            DomainError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DomainError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let DomainError::Database(err) = self {
            log::error!("database failure: {err}");
        }
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }))
    }
}
