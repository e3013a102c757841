//! Managed identity provider collaborator.
//!
//! The provider owns managed identities, their passwords and their sessions.
//! The core only talks to it through [`ManagedIdentityProvider`];
//! [`gotrue::GoTrueProvider`] is the HTTP implementation.

pub mod gotrue;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{Identity, Metadata, Session};

/// Provider errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// An identity with this email already exists.
    #[error("Identity already exists")]
    Conflict,

    /// The provider understood the request and refused it (bad token, bad
    /// password, weak password, ...).
    #[error("Rejected by identity provider: {0}")]
    Rejected(String),

    /// Transport failure, 5xx, or timeout.
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Request to create a managed identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password: String,
    pub metadata: Metadata,
}

/// Result of `create_identity`.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub identity: Identity,
    /// `None` when the provider requires email confirmation before sign-in.
    pub session: Option<Session>,
}

/// Capabilities the core consumes from the managed identity provider.
#[async_trait]
pub trait ManagedIdentityProvider: Send + Sync {
    /// Create an identity. Fails with [`ProviderError::Conflict`] when the
    /// email is taken, including when the provider hides the duplicate
    /// behind an ordinary-looking answer.
    async fn create_identity(&self, request: NewIdentity) -> Result<Provisioned, ProviderError>;

    /// Introspect an access token. Read-only.
    async fn verify_session(&self, access_token: &str) -> Result<Identity, ProviderError>;

    /// Exchange a refresh token for a new session.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError>;

    /// Start the provider's password reset flow for an email.
    async fn reset_credential(&self, email: &str) -> Result<(), ProviderError>;

    /// Email + password sign-in.
    async fn sign_in(&self, email: &str, password: &str)
    -> Result<(Identity, Session), ProviderError>;

    /// Revoke the session behind an access token.
    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Set a new password for the identity behind an access token, typically
    /// one issued by a password recovery link.
    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;

    /// Administrative lookup by identity id, used to observe email confirmation.
    async fn fetch_identity(&self, id: &str) -> Result<Option<Identity>, ProviderError>;

    /// Administrative lookup by email (case-insensitive, exact match).
    async fn find_identity_by_email(&self, email: &str)
    -> Result<Option<Identity>, ProviderError>;
}
