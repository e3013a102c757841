//! Identity resolution across credential schemes.
//!
//! The resolver walks an ordered chain of verifiers and returns the first
//! success. The managed verifier always comes first: once a user has
//! migrated, a retained legacy token must never win over their managed
//! session, and the managed path is the one the migrated majority takes.

use std::sync::Arc;

use tracing::{debug, info};

use super::{AuthError, CredentialVerifier};
use crate::models::auth::{AuthOutcome, Scheme};

/// Ordered fallback chain of credential verifiers.
#[derive(Clone)]
pub struct IdentityResolver {
    chain: Vec<Arc<dyn CredentialVerifier>>,
}

impl IdentityResolver {
    /// Managed first, legacy second.
    pub fn new(managed: Arc<dyn CredentialVerifier>, legacy: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            chain: vec![managed, legacy],
        }
    }

    /// Append another scheme at the end of the chain.
    pub fn with_fallback(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.chain.push(verifier);
        self
    }

    /// Schemes in the order they are tried.
    pub fn order(&self) -> Vec<Scheme> {
        self.chain.iter().map(|v| v.scheme()).collect()
    }

    /// Resolve a bearer token to an identity.
    ///
    /// Any verifier failure, including a provider outage, moves on to the
    /// next scheme. When every scheme refuses the token the result is
    /// [`AuthError::Unauthenticated`].
    pub async fn resolve(&self, token: &str) -> Result<AuthOutcome, AuthError> {
        for verifier in &self.chain {
            match verifier.verify(token).await {
                Ok(identity) => {
                    if identity.scheme == Scheme::Legacy {
                        info!(user_id = %identity.id, "caller authenticated with legacy token");
                    }
                    return Ok(AuthOutcome::new(identity, token));
                }
                Err(e) => {
                    debug!(scheme = %verifier.scheme(), error = %e, "verifier refused token");
                }
            }
        }
        Err(AuthError::Unauthenticated)
    }
}

/// Whether the caller still authenticates through the legacy scheme.
pub fn is_legacy(outcome: &AuthOutcome) -> bool {
    outcome.scheme == Scheme::Legacy
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::auth::legacy::LegacyVerifier;
    use crate::auth::managed::ManagedVerifier;
    use crate::memory::{MemoryIdentityProvider, MemoryLegacyStore};
    use crate::models::auth::{Identity, Metadata};

    /// Verifier that accepts one fixed token and counts its calls.
    struct CountingVerifier {
        scheme: Scheme,
        accepts: &'static str,
        calls: AtomicU32,
    }

    impl CountingVerifier {
        fn new(scheme: Scheme, accepts: &'static str) -> Arc<Self> {
            Arc::new(Self {
                scheme,
                accepts,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialVerifier for CountingVerifier {
        async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token != self.accepts {
                return Err(AuthError::InvalidCredential);
            }
            Ok(Identity {
                id: format!("{}-id", self.scheme),
                email: "u@x.com".into(),
                display_name: "poet".into(),
                email_confirmed: true,
                created_at: Utc::now(),
                metadata: Metadata::new(),
                scheme: self.scheme,
            })
        }

        fn scheme(&self) -> Scheme {
            self.scheme
        }
    }

    #[tokio::test]
    async fn managed_success_never_touches_legacy() {
        let managed = CountingVerifier::new(Scheme::Managed, "shared");
        let legacy = CountingVerifier::new(Scheme::Legacy, "shared");
        let resolver = IdentityResolver::new(managed.clone(), legacy.clone());

        let outcome = resolver.resolve("shared").await.unwrap();

        assert_eq!(outcome.scheme, Scheme::Managed);
        assert_eq!(outcome.identity.id, "managed-id");
        assert_eq!(outcome.raw_credential, "shared");
        assert_eq!(managed.calls(), 1);
        assert_eq!(legacy.calls(), 0);
        assert!(!is_legacy(&outcome));
    }

    #[tokio::test]
    async fn legacy_is_the_fallback() {
        let managed = CountingVerifier::new(Scheme::Managed, "m");
        let legacy = CountingVerifier::new(Scheme::Legacy, "l");
        let resolver = IdentityResolver::new(managed.clone(), legacy.clone());

        let outcome = resolver.resolve("l").await.unwrap();

        assert_eq!(outcome.scheme, Scheme::Legacy);
        assert!(is_legacy(&outcome));
        assert_eq!(managed.calls(), 1);
        assert_eq!(legacy.calls(), 1);
    }

    #[tokio::test]
    async fn all_refusals_are_unauthenticated() {
        let resolver = IdentityResolver::new(
            CountingVerifier::new(Scheme::Managed, "m"),
            CountingVerifier::new(Scheme::Legacy, "l"),
        );
        assert_eq!(
            resolver.resolve("neither").await.unwrap_err(),
            AuthError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn appended_scheme_is_tried_last() {
        let third = CountingVerifier::new(Scheme::Legacy, "third");
        let resolver = IdentityResolver::new(
            CountingVerifier::new(Scheme::Managed, "m"),
            CountingVerifier::new(Scheme::Legacy, "l"),
        )
        .with_fallback(third.clone());

        assert_eq!(
            resolver.order(),
            vec![Scheme::Managed, Scheme::Legacy, Scheme::Legacy]
        );
        assert!(resolver.resolve("third").await.is_ok());
        assert_eq!(third.calls(), 1);
    }

    #[tokio::test]
    async fn real_verifiers_resolve_legacy_until_subject_is_retired() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let provider = Arc::new(MemoryIdentityProvider::new());
        let legacy = Arc::new(LegacyVerifier::new(b"secret", store.clone()));
        let resolver = IdentityResolver::new(
            Arc::new(ManagedVerifier::new(provider, Duration::from_secs(1))),
            legacy.clone(),
        );

        let token = legacy.issue("42").unwrap();
        assert_eq!(resolver.resolve(&token).await.unwrap().scheme, Scheme::Legacy);

        store.remove("42");
        assert_eq!(
            resolver.resolve(&token).await.unwrap_err(),
            AuthError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn provider_outage_still_allows_legacy() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider.set_unavailable(true);
        let legacy = Arc::new(LegacyVerifier::new(b"secret", store));
        let resolver = IdentityResolver::new(
            Arc::new(ManagedVerifier::new(provider, Duration::from_secs(1))),
            legacy.clone(),
        );

        let token = legacy.issue("42").unwrap();
        assert_eq!(resolver.resolve(&token).await.unwrap().scheme, Scheme::Legacy);
    }
}
