//! Authentication and authorization logic.
//!
//! Two credential verifiers (legacy HS256 tokens and managed provider
//! sessions) sit behind one [`CredentialVerifier`] contract. The
//! [`resolver::IdentityResolver`] chains them, the [`guard::AccessGuard`]
//! fronts the resolver for request handling, and [`login::HybridLogin`]
//! performs password sign-in across both schemes. New accounts are only ever
//! created as managed identities ([`register`]).

pub mod advisory;
pub mod guard;
pub mod legacy;
pub mod login;
pub mod managed;
pub mod password;
pub mod register;
pub mod resolver;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{Identity, Scheme};

/// Authentication errors.
///
/// Verification failures are coarse: callers see
/// `InvalidCredential` / `Unauthenticated`, never which check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Malformed credential")]
    MalformedCredential,

    #[error("Expired or invalid session")]
    ExpiredOrInvalid,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Identity provider unavailable")]
    ProviderUnavailable,

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One credential scheme's answer to "is this token valid, and for whom?".
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verify an opaque bearer token.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;

    /// Scheme this verifier authenticates.
    fn scheme(&self) -> Scheme;
}
