//! Request-facing access guard.
//!
//! The guard turns a raw `Authorization` header value into an
//! [`AuthOutcome`]. Missing or malformed headers are rejected before the
//! resolver runs, so junk requests never reach the identity provider.

use super::AuthError;
use super::resolver::IdentityResolver;
use crate::models::auth::AuthOutcome;

const BEARER_PREFIX: &str = "Bearer ";

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredential)?;
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedCredential)?
        .trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedCredential);
    }
    Ok(token)
}

/// Gate in front of protected operations.
#[derive(Clone)]
pub struct AccessGuard {
    resolver: IdentityResolver,
}

impl AccessGuard {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Required mode: the caller must present a credential that resolves.
    pub async fn authorize(&self, header: Option<&str>) -> Result<AuthOutcome, AuthError> {
        let token = bearer_token(header)?;
        self.resolver.resolve(token).await
    }

    /// Optional mode: absence or invalidity is simply "no identity".
    pub async fn authorize_optional(&self, header: Option<&str>) -> Option<AuthOutcome> {
        self.authorize(header).await.ok()
    }
}
