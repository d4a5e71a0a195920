//! Application-wide error types.
//!
//! Every variant carries a stable machine-readable [`PoolError::kind`] so that
//! clients can branch on the failure, plus a display message for humans.
//! Storage, gateway and configuration failures never leak their internals to
//! the response body; the detail goes to the log instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Amount must be a positive whole number of the smallest currency unit")]
    InvalidAmount,

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Payment {0} has already been recorded")]
    DuplicatePayment(String),

    #[error("Insufficient pool balance: requested {requested}, available {available}")]
    InsufficientPool { requested: i64, available: i64 },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Feedback already submitted for this campaign")]
    DuplicateFeedback,

    #[error("Campaign is not completed yet")]
    CampaignNotCompleted,

    #[error("Rating must be a whole number from 1 to 5, got {0}")]
    InvalidRating(String),

    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error("Malformed request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Stable identifier of the failure, safe to branch on client-side.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidSignature => "invalid_signature",
            Self::DuplicatePayment(_) => "duplicate_payment",
            Self::InsufficientPool { .. } => "insufficient_pool",
            Self::CampaignNotFound(_) => "campaign_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::DuplicateFeedback => "duplicate_feedback",
            Self::CampaignNotCompleted => "campaign_not_completed",
            Self::InvalidRating(_) => "invalid_rating",
            Self::MissingInput(_) => "missing_input",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Database(_) | Self::Migrate(_) => "storage_failure",
            Self::Http(_) => "gateway_unavailable",
            Self::GatewayRejected(_) => "gateway_rejected",
            Self::Config(_) => "configuration_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidAmount
            | Self::InvalidRating(_)
            | Self::MissingInput(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::DuplicatePayment(_) | Self::DuplicateFeedback => StatusCode::CONFLICT,
            Self::InsufficientPool { .. } | Self::CampaignNotCompleted => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::CampaignNotFound(_) | Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Migrate(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Http(_) | Self::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the end user.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Migrate(_) => {
                "Storage is temporarily unavailable, please retry".to_string()
            }
            Self::Http(_) => "Payment gateway is unreachable, please retry".to_string(),
            Self::GatewayRejected(_) => "Payment gateway rejected the request".to_string(),
            Self::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), "Request failed: {self}");
        }
        let body = ErrorResponse {
            success: false,
            error: self.kind(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
