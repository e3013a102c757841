//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verse_core::auth::advisory::MigrationAdvisory;
use verse_core::models::auth::{Identity, Scheme, Session};
use verse_core::models::migration::MigrationReceipt;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Completes a recovery link: `access_token` is the token the link carried.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub access_token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub email: String,
    pub current_password: String,
    pub new_password: String,
}

/// Public view of an identity.
#[derive(Debug, Serialize)]
pub struct UserBody {
    pub id: String,
    pub email: String,
    pub username: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for UserBody {
    fn from(identity: &Identity) -> Self {
        let username = identity
            .metadata
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or(identity.display_name.as_str())
            .to_string();
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            username,
            email_confirmed: identity.email_confirmed,
            created_at: identity.created_at,
        }
    }
}

/// Body of `POST /auth/register`. Tokens are absent until the email is
/// confirmed when the provider requires confirmation.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scheme: Scheme,
    pub user: UserBody,
    pub needs_migration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            expires_in: s.expires_in,
            token_type: s.token_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body of `POST /auth/migrate`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrateResponse {
    Completed {
        receipt: MigrationReceipt,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionResponse>,
    },
    PendingConfirmation {
        legacy_id: String,
        new_id: String,
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    pub valid: bool,
    pub scheme: Scheme,
    pub user: UserBody,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserBody,
    pub scheme: Scheme,
    #[serde(flatten)]
    pub advisory: MigrationAdvisory,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
