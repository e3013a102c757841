//! Managed provider session verification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{AuthError, CredentialVerifier};
use crate::models::auth::{Identity, Scheme};
use crate::provider::{ManagedIdentityProvider, ProviderError};

/// Verifies provider session tokens by introspection.
///
/// Never refreshes or otherwise mutates the session.
pub struct ManagedVerifier {
    provider: Arc<dyn ManagedIdentityProvider>,
    timeout: Duration,
}

impl ManagedVerifier {
    pub fn new(provider: Arc<dyn ManagedIdentityProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl CredentialVerifier for ManagedVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MalformedCredential);
        }
        match timeout(self.timeout, self.provider.verify_session(token)).await {
            Ok(Ok(mut identity)) => {
                identity.scheme = Scheme::Managed;
                Ok(identity)
            }
            Ok(Err(ProviderError::Unavailable(reason))) => {
                warn!(%reason, "identity provider unavailable during verification");
                Err(AuthError::ProviderUnavailable)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "managed session rejected");
                Err(AuthError::ExpiredOrInvalid)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "identity provider timed out");
                Err(AuthError::ProviderUnavailable)
            }
        }
    }

    fn scheme(&self) -> Scheme {
        Scheme::Managed
    }
}
