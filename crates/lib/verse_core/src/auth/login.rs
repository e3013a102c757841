//! Password sign-in across both schemes.
//!
//! The provider is asked first. Only when it refuses (or is unreachable) is
//! the legacy `users` table consulted; a legacy match yields a 7 day legacy
//! token flagged for migration. Every refusal looks the same to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use super::AuthError;
use super::legacy::{LEGACY_TOKEN_EXPIRY_DAYS, LegacyVerifier};
use super::password::verify_password;
use crate::models::auth::{Identity, Scheme};
use crate::provider::ManagedIdentityProvider;
use crate::store::LegacyStore;

/// Successful sign-in.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub scheme: Scheme,
    pub access_token: String,
    /// Legacy tokens cannot be refreshed.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub needs_migration: bool,
}

/// Email + password sign-in, managed first, legacy second.
pub struct HybridLogin {
    pub(super) provider: Arc<dyn ManagedIdentityProvider>,
    pub(super) legacy_store: Arc<dyn LegacyStore>,
    legacy: Arc<LegacyVerifier>,
    pub(super) timeout: Duration,
}

impl HybridLogin {
    pub fn new(
        provider: Arc<dyn ManagedIdentityProvider>,
        legacy_store: Arc<dyn LegacyStore>,
        legacy: Arc<LegacyVerifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            legacy_store,
            legacy,
            timeout,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        match timeout(self.timeout, self.provider.sign_in(email, password)).await {
            Ok(Ok((mut identity, session))) => {
                identity.scheme = Scheme::Managed;
                info!(email, "managed sign-in succeeded");
                return Ok(LoginOutcome {
                    identity,
                    scheme: Scheme::Managed,
                    access_token: session.access_token,
                    refresh_token: Some(session.refresh_token),
                    expires_in: session.expires_in,
                    needs_migration: false,
                });
            }
            Ok(Err(e)) => info!(email, error = %e, "managed sign-in refused, trying legacy"),
            Err(_) => warn!(email, "managed sign-in timed out, trying legacy"),
        }

        let record = self
            .legacy_store
            .find_by_email(email)
            .await
            .map_err(|e| AuthError::Internal(format!("legacy lookup: {e}")))?
            .ok_or(AuthError::InvalidCredential)?;

        if !verify_password(password, &record.password_hash) {
            warn!(email, "legacy password mismatch");
            return Err(AuthError::InvalidCredential);
        }

        let access_token = self.legacy.issue(&record.id)?;
        warn!(email, legacy_id = %record.id, "caller signed in through the legacy scheme");
        Ok(LoginOutcome {
            identity: Identity::from_legacy(&record),
            scheme: Scheme::Legacy,
            access_token,
            refresh_token: None,
            expires_in: LEGACY_TOKEN_EXPIRY_DAYS * 24 * 60 * 60,
            needs_migration: true,
        })
    }
}
