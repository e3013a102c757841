//! Authentication request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use verse_core::auth::advisory::MigrationAdvisory;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::{AuthenticatedUser, MaybeAuthenticated};
use crate::models::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MeResponse, MessageResponse,
    RefreshRequest, RegisterRequest, RegisterResponse, ResetPasswordRequest, SessionResponse,
    VerifyTokenRequest, VerifyTokenResponse,
};
use crate::services::auth;

/// `POST /auth/register`: create a managed account.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let resp = auth::register(
        &state,
        &body.email,
        &body.password,
        body.username.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /auth/login`: sign in with email + password under either scheme.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let resp = auth::login(&state, &body.email, &body.password).await?;
    Ok(Json(resp))
}

/// `POST /auth/refresh`: exchange a managed refresh token for a new session.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<SessionResponse>> {
    let resp = auth::refresh(&state, &body.refresh_token).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout`. Requires authentication.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(outcome)): Extension<AuthenticatedUser>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::logout(&state, &outcome).await?;
    Ok(Json(resp))
}

/// `POST /auth/reset-password`: finish a recovery link.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::reset_password(&state, &body.access_token, &body.new_password).await?;
    Ok(Json(resp))
}

pub async fn verify_token_handler(
    State(state): State<AppState>,
    Json(body): Json<VerifyTokenRequest>,
) -> AppResult<Json<VerifyTokenResponse>> {
    let resp = auth::verify_token(&state, &body.access_token).await?;
    Ok(Json(resp))
}

/// `POST /auth/forgot-password`
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::forgot_password(&state, &body.email).await?;
    Ok(Json(resp))
}

/// `GET /auth/migration-status`: advisory for the caller, if any.
pub async fn migration_status_handler(
    Extension(MaybeAuthenticated(outcome)): Extension<MaybeAuthenticated>,
) -> Json<MigrationAdvisory> {
    Json(MigrationAdvisory::for_outcome(outcome.as_ref()))
}

/// `GET /auth/me`: the resolved caller. Requires authentication.
pub async fn me_handler(
    Extension(AuthenticatedUser(outcome)): Extension<AuthenticatedUser>,
) -> Json<MeResponse> {
    Json(auth::me(&outcome))
}
