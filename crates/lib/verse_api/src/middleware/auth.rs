//! Authentication middleware: bearer extraction, identity resolution, and
//! migration advisory headers for legacy callers.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use verse_core::auth::AuthError;
use verse_core::auth::advisory::MIGRATION_URL;
use verse_core::auth::resolver::is_legacy;
use verse_core::models::auth::AuthOutcome;

use crate::AppState;
use crate::error::AppError;

pub const MIGRATION_SUGGESTED_HEADER: HeaderName = HeaderName::from_static("x-migration-suggested");
pub const MIGRATION_URL_HEADER: HeaderName = HeaderName::from_static("x-migration-url");

/// Resolved caller, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthOutcome);

/// Resolution result stored by [`optional_auth`]; `None` for anonymous callers.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticated(pub Option<AuthOutcome>);

/// The `Authorization` header as text. A header that is present but not
/// visible ASCII is malformed, not missing.
fn authorization(request: &Request) -> Result<Option<&str>, AuthError> {
    request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| AuthError::MalformedCredential))
        .transpose()
}

/// Axum middleware: the request must carry a bearer credential that
/// resolves under either scheme.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = authorization(&request)?;
    let outcome = state.guard.authorize(header).await?;
    let legacy = is_legacy(&outcome);
    request.extensions_mut().insert(AuthenticatedUser(outcome));

    let mut response = next.run(request).await;
    if legacy {
        advise_migration(&mut response);
    }
    Ok(response)
}

/// Axum middleware: resolves the caller when possible and never rejects.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = match authorization(&request) {
        Ok(header) => state.guard.authorize_optional(header).await,
        Err(_) => None,
    };
    let legacy = outcome.as_ref().is_some_and(is_legacy);
    request.extensions_mut().insert(MaybeAuthenticated(outcome));

    let mut response = next.run(request).await;
    if legacy {
        advise_migration(&mut response);
    }
    response
}

fn advise_migration(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(MIGRATION_SUGGESTED_HEADER, HeaderValue::from_static("true"));
    headers.insert(MIGRATION_URL_HEADER, HeaderValue::from_static(MIGRATION_URL));
}
