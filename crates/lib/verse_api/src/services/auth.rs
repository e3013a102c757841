//! Authentication service: sign-up, sign-in, session pass-through and
//! migration flows delegating to `verse_core`.

use tracing::{info, warn};
use verse_core::auth::advisory::MigrationAdvisory;
use verse_core::migration::MIN_PASSWORD_LEN;
use verse_core::models::auth::{AuthOutcome, Scheme};
use verse_core::models::migration::MigrationOutcome;
use verse_core::provider::ProviderError;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    LoginResponse, MeResponse, MessageResponse, MigrateResponse, RegisterResponse,
    SessionResponse, UserBody, VerifyTokenResponse,
};

const RESET_SENT_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent.";

const CONFIRMATION_MESSAGE: &str =
    "Check your inbox to confirm your new account. Your content moves over once it is confirmed.";

const REGISTERED_MESSAGE: &str = "Account created.";

const REGISTERED_UNCONFIRMED_MESSAGE: &str =
    "Account created. Check your inbox to confirm your email before signing in.";

// ---------------------------------------------------------------------------
// Sign-up
// ---------------------------------------------------------------------------

/// Create a managed account.
pub async fn register(
    state: &AppState,
    email: &str,
    password: &str,
    username: Option<&str>,
) -> AppResult<RegisterResponse> {
    let provisioned = state.login.register(email, password, username).await?;
    let message = if provisioned.session.is_some() {
        REGISTERED_MESSAGE
    } else {
        REGISTERED_UNCONFIRMED_MESSAGE
    };
    let (token, refresh_token) = match provisioned.session {
        Some(session) => (Some(session.access_token), Some(session.refresh_token)),
        None => (None, None),
    };
    Ok(RegisterResponse {
        message: message.into(),
        user: UserBody::from(&provisioned.identity),
        token,
        refresh_token,
    })
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

/// Hybrid password sign-in.
pub async fn login(state: &AppState, email: &str, password: &str) -> AppResult<LoginResponse> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(AppError::Validation("Email and password are required".into()));
    }
    let outcome = state.login.login(email, password).await?;
    let migration_message = outcome
        .needs_migration
        .then(|| MigrationAdvisory::suggested().message)
        .flatten();
    Ok(LoginResponse {
        token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        expires_in: outcome.expires_in,
        scheme: outcome.scheme,
        user: UserBody::from(&outcome.identity),
        needs_migration: outcome.needs_migration,
        migration_message,
    })
}

// ---------------------------------------------------------------------------
// Provider pass-through
// ---------------------------------------------------------------------------

pub async fn refresh(state: &AppState, refresh_token: &str) -> AppResult<SessionResponse> {
    if refresh_token.trim().is_empty() {
        return Err(AppError::Validation("refresh_token is required".into()));
    }
    let session = state.provider.refresh_session(refresh_token).await?;
    Ok(session.into())
}

/// End the caller's session. Legacy tokens are stateless, so for legacy
/// callers this only acknowledges; the token stays valid until it expires.
pub async fn logout(state: &AppState, outcome: &AuthOutcome) -> AppResult<MessageResponse> {
    if outcome.scheme == Scheme::Managed {
        state.provider.sign_out(&outcome.raw_credential).await?;
        info!(id = %outcome.identity.id, "managed session revoked");
    }
    Ok(MessageResponse {
        message: "Signed out".into(),
    })
}

/// Set a new password with the token from a recovery link.
pub async fn reset_password(
    state: &AppState,
    access_token: &str,
    new_password: &str,
) -> AppResult<MessageResponse> {
    if access_token.trim().is_empty() || new_password.is_empty() {
        return Err(AppError::Validation(
            "access_token and new_password are required".into(),
        ));
    }
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    state
        .provider
        .update_password(access_token.trim(), new_password)
        .await?;
    Ok(MessageResponse {
        message: "Password updated".into(),
    })
}

/// Resolve a token under either scheme without touching the caller's session.
pub async fn verify_token(state: &AppState, access_token: &str) -> AppResult<VerifyTokenResponse> {
    let token = access_token.trim();
    if token.is_empty() {
        return Err(AppError::Validation("access_token is required".into()));
    }
    let outcome = state.guard.resolver().resolve(token).await?;
    Ok(VerifyTokenResponse {
        valid: true,
        scheme: outcome.scheme,
        user: UserBody::from(&outcome.identity),
    })
}

/// Start a password reset. The answer does not reveal whether the email
/// belongs to an account.
pub async fn forgot_password(state: &AppState, email: &str) -> AppResult<MessageResponse> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("Email is required".into()));
    }
    match state.provider.reset_credential(email).await {
        Ok(()) => info!(email, "password reset requested"),
        Err(ProviderError::Unavailable(msg)) => {
            return Err(AppError::ProviderUnavailable(msg));
        }
        Err(e) => warn!(email, error = %e, "password reset refused by provider"),
    }
    Ok(MessageResponse {
        message: RESET_SENT_MESSAGE.into(),
    })
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

pub async fn migrate(
    state: &AppState,
    email: &str,
    current_password: &str,
    new_password: &str,
) -> AppResult<MigrateResponse> {
    let outcome = state
        .coordinator
        .migrate(email, current_password, new_password)
        .await?;
    Ok(match outcome {
        MigrationOutcome::Completed { receipt, session } => MigrateResponse::Completed {
            receipt,
            session: session.map(SessionResponse::from),
        },
        MigrationOutcome::Deferred { legacy_id, new_id } => MigrateResponse::PendingConfirmation {
            legacy_id,
            new_id,
            message: CONFIRMATION_MESSAGE.into(),
        },
    })
}

/// Current caller with its scheme and advisory.
pub fn me(outcome: &AuthOutcome) -> MeResponse {
    MeResponse {
        user: UserBody::from(&outcome.identity),
        scheme: outcome.scheme,
        advisory: MigrationAdvisory::for_outcome(Some(outcome)),
    }
}
