//! Unified error handling for Charon
//!
//! All failures in the platform are expressed through [`AppError`]. Every
//! variant maps to a stable machine-readable kind string that RPC clients
//! can branch on, and to an HTTP status for the API layer.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// Implements `ResponseError` so API handlers can bubble it up directly.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Input Validation ====================
    #[error("Mandatory field missing: {0}")]
    MandatoryFieldMissing(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Parser error: {0}")]
    Parser(String),

    // ==================== Lookup ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Broken reference: {0}")]
    BrokenReference(String),

    // ==================== Rating ====================
    #[error("Rating plan not found for: {0}")]
    RatingPlanNotFound(String),

    #[error("Malformed rate: {0}")]
    MalformedRate(String),

    #[error("Fallback subject loop detected: {0}")]
    FallbackLoop(String),

    // ==================== Accounting ====================
    #[error("Account disabled: {0}")]
    AccountDisabled(String),

    #[error("Insufficient credit: required {required}, available {available}")]
    InsufficientCredit { required: String, available: String },

    #[error("Action trigger loop detected on account: {0}")]
    TriggerLoop(String),

    #[error("Balance expired: {0}")]
    BalanceExpired(String),

    #[error("Action group aborted: {0}")]
    ActionGroupAborted(String),

    // ==================== Concurrency ====================
    #[error("Guardian timeout on lock: {0}")]
    GuardianTimeout(String),

    // ==================== Storage ====================
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    // ==================== Internal ====================
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Convenience result alias used across all crates
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::MandatoryFieldMissing(_)
            | AppError::InvalidPath(_)
            | AppError::Parser(_)
            | AppError::MalformedRate(_) => StatusCode::BAD_REQUEST,

            // 402 Payment Required
            AppError::InsufficientCredit { .. } => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::AccountDisabled(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound(_) | AppError::RatingPlanNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::FallbackLoop(_)
            | AppError::TriggerLoop(_)
            | AppError::BrokenReference(_)
            | AppError::ActionGroupAborted(_) => StatusCode::CONFLICT,

            // 410 Gone
            AppError::BalanceExpired(_) => StatusCode::GONE,

            // 423 Locked
            AppError::GuardianTimeout(_) => StatusCode::LOCKED,

            // 503 Service Unavailable (retryable)
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the stable kind string for RPC replies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MandatoryFieldMissing(_) => "mandatory_field_missing",
            AppError::InvalidPath(_) => "invalid_path",
            AppError::Parser(_) => "parser_error",
            AppError::NotFound(_) => "not_found",
            AppError::BrokenReference(_) => "broken_reference",
            AppError::RatingPlanNotFound(_) => "rating_plan_not_found",
            AppError::MalformedRate(_) => "malformed_rate",
            AppError::FallbackLoop(_) => "fallback_loop",
            AppError::AccountDisabled(_) => "account_disabled",
            AppError::InsufficientCredit { .. } => "insufficient_credit",
            AppError::TriggerLoop(_) => "trigger_loop",
            AppError::BalanceExpired(_) => "balance_expired",
            AppError::ActionGroupAborted(_) => "action_group_aborted",
            AppError::GuardianTimeout(_) => "guardian_timeout",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::Serialization(_) => "serialization_error",
            AppError::Config(_) => "config_error",
            AppError::ServerError(_) => "server_error",
        }
    }

    /// True when the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::StorageUnavailable(_) | AppError::GuardianTimeout(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ServerError(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        AppError::Parser(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InsufficientCredit {
                required: "10".to_string(),
                available: "5".to_string()
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            AppError::RatingPlanNotFound("cgrates.org:call:1001".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::GuardianTimeout("cgrates.org:1001".to_string()).status_code(),
            StatusCode::LOCKED
        );
    }

    #[test]
    fn test_error_kinds_are_stable() {
        assert_eq!(
            AppError::InsufficientCredit {
                required: "1".to_string(),
                available: "0".to_string()
            }
            .kind(),
            "insufficient_credit"
        );
        assert_eq!(AppError::TriggerLoop("acc".to_string()).kind(), "trigger_loop");
        assert_eq!(
            AppError::StorageUnavailable("down".to_string()).kind(),
            "storage_unavailable"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AppError::StorageUnavailable("x".to_string()).is_retryable());
        assert!(!AppError::NotFound("x".to_string()).is_retryable());
    }
}
