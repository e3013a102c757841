//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use verse_core::auth::AuthError;
use verse_core::auth::register::RegistrationError;
use verse_core::migration::MigrationError;
use verse_core::provider::ProviderError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Partial migration: {0}")]
    PartialMigration(String),

    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::PartialMigration(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "partial_migration",
                m.as_str(),
            ),
            AppError::ProviderUnavailable(m) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_unavailable",
                m.as_str(),
            ),
            AppError::Internal(detail) => {
                error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    /// Every authentication failure gets the same body; which check failed
    /// is only visible in the server log.
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal(msg) => AppError::Internal(msg),
            _ => AppError::Unauthorized("Invalid credential".into()),
        }
    }
}

impl From<MigrationError> for AppError {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Validation(msg) => AppError::Validation(msg),
            MigrationError::UnknownAccount => {
                AppError::NotFound("No legacy account is registered for this email".into())
            }
            MigrationError::WrongCredential => {
                AppError::Unauthorized("Current password is incorrect".into())
            }
            MigrationError::AlreadyInProgress => AppError::Conflict(
                "A migration for this account is already in progress".into(),
            ),
            MigrationError::PartialMigration { step, .. } => AppError::PartialMigration(format!(
                "Your new account was created but the upgrade stopped at the {step} step. \
                 It will be finished automatically, or retry the upgrade with the same details."
            )),
            MigrationError::Provider(ProviderError::Unavailable(msg)) => {
                AppError::ProviderUnavailable(msg)
            }
            MigrationError::Provider(ProviderError::Conflict) => AppError::Conflict(
                "A managed account already exists for this email".into(),
            ),
            MigrationError::Provider(ProviderError::Rejected(msg)) => AppError::Validation(msg),
            MigrationError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<RegistrationError> for AppError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::Validation(msg) => AppError::Validation(msg),
            RegistrationError::LegacyAccount => AppError::Conflict(
                "This email belongs to an existing account. Sign in and upgrade it instead.".into(),
            ),
            RegistrationError::EmailTaken => AppError::Conflict("Email already registered".into()),
            RegistrationError::Provider(ProviderError::Unavailable(msg)) => {
                AppError::ProviderUnavailable(msg)
            }
            RegistrationError::Provider(ProviderError::Conflict) => {
                AppError::Conflict("Email already registered".into())
            }
            RegistrationError::Provider(ProviderError::Rejected(msg)) => AppError::Validation(msg),
            RegistrationError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(msg) => AppError::ProviderUnavailable(msg),
            ProviderError::Rejected(_) | ProviderError::Conflict => {
                AppError::Unauthorized("Invalid credential".into())
            }
        }
    }
}
