//! Identity migration handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{MigrateRequest, MigrateResponse};
use crate::services::auth;

/// `POST /auth/migrate`: move a legacy account to the managed provider.
///
/// Answers `200` when the migration completed and `202` when the remap waits
/// for the new identity's email confirmation.
pub async fn migrate_handler(
    State(state): State<AppState>,
    Json(body): Json<MigrateRequest>,
) -> AppResult<(StatusCode, Json<MigrateResponse>)> {
    let resp = auth::migrate(
        &state,
        &body.email,
        &body.current_password,
        &body.new_password,
    )
    .await?;
    let status = match resp {
        MigrateResponse::Completed { .. } => StatusCode::OK,
        MigrateResponse::PendingConfirmation { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(resp)))
}
