//! Legacy self-issued token verification and issuance.
//!
//! Legacy tokens are HS256 JWTs signed with the server secret, carrying
//! `{user_id, exp}` with a fixed 7 day lifetime. A cryptographically valid
//! token only authenticates while its subject still has a row in the legacy
//! store: once an account has been migrated and retired, old tokens are dead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, warn};

use super::{AuthError, CredentialVerifier};
use crate::models::auth::{Identity, LegacyClaims, Scheme};
use crate::store::LegacyStore;

/// Legacy token lifetime: 7 days, not renewable.
pub const LEGACY_TOKEN_EXPIRY_DAYS: i64 = 7;

/// Why a legacy token was refused. Never leaves this module: callers only
/// ever see [`AuthError::InvalidCredential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyRejection {
    SignatureInvalid,
    Expired,
    SubjectNotFound,
}

/// Verifier (and issuer) for legacy HS256 tokens.
pub struct LegacyVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    store: Arc<dyn LegacyStore>,
}

impl LegacyVerifier {
    pub fn new(secret: &[u8], store: Arc<dyn LegacyStore>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            store,
        }
    }

    /// Issue a 7 day legacy token for a legacy account id.
    pub fn issue(&self, subject_id: &str) -> Result<String, AuthError> {
        let claims = LegacyClaims {
            subject_id: subject_id.to_string(),
            exp: (Utc::now() + Duration::days(LEGACY_TOKEN_EXPIRY_DAYS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Decode the token without touching the store.
    pub fn decode_claims(&self, token: &str) -> Option<LegacyClaims> {
        self.decode(token).ok()
    }

    fn decode(&self, token: &str) -> Result<LegacyClaims, LegacyRejection> {
        decode::<LegacyClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => LegacyRejection::Expired,
                _ => LegacyRejection::SignatureInvalid,
            })
    }

    async fn check(&self, token: &str) -> Result<Identity, LegacyRejection> {
        let claims = self.decode(token)?;
        let record = match self.store.find_by_id(&claims.subject_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(LegacyRejection::SubjectNotFound),
            Err(e) => {
                // A store outage must not authenticate anyone.
                warn!(error = %e, "legacy store lookup failed during verification");
                return Err(LegacyRejection::SubjectNotFound);
            }
        };
        Ok(Identity::from_legacy(&record))
    }
}

#[async_trait]
impl CredentialVerifier for LegacyVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        self.check(token).await.map_err(|rejection| {
            debug!(?rejection, "legacy token rejected");
            AuthError::InvalidCredential
        })
    }

    fn scheme(&self) -> Scheme {
        Scheme::Legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLegacyStore;

    const SECRET: &[u8] = b"legacy-secret";

    fn verifier_with(store: &Arc<MemoryLegacyStore>) -> LegacyVerifier {
        LegacyVerifier::new(SECRET, store.clone())
    }

    fn expired_token(subject: &str) -> String {
        let claims = LegacyClaims {
            subject_id: subject.into(),
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn issued_token_verifies_while_subject_exists() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let verifier = verifier_with(&store);

        let token = verifier.issue("42").unwrap();
        let identity = verifier.verify(&token).await.unwrap();

        assert_eq!(identity.id, "42");
        assert_eq!(identity.email, "u@x.com");
        assert_eq!(identity.scheme, Scheme::Legacy);
    }

    #[tokio::test]
    async fn issued_token_expires_after_seven_days() {
        let store = Arc::new(MemoryLegacyStore::new());
        let verifier = verifier_with(&store);
        let token = verifier.issue("42").unwrap();
        let claims = verifier.decode_claims(&token).unwrap();
        let lifetime = claims.exp - Utc::now().timestamp();
        assert!(lifetime > Duration::days(7).num_seconds() - 5);
        assert!(lifetime <= Duration::days(7).num_seconds());
    }

    #[tokio::test]
    async fn deleted_subject_is_rejected_despite_valid_signature() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let verifier = verifier_with(&store);
        let token = verifier.issue("42").unwrap();

        store.delete_by_id("42").await.unwrap();

        assert!(verifier.decode_claims(&token).is_some());
        assert_eq!(
            verifier.verify(&token).await.unwrap_err(),
            AuthError::InvalidCredential
        );
    }

    #[tokio::test]
    async fn all_rejections_collapse_to_invalid_credential() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let verifier = verifier_with(&store);

        let forged = LegacyVerifier::new(b"other-secret", store.clone())
            .issue("42")
            .unwrap();
        assert_eq!(verifier.check(&forged).await.unwrap_err(), LegacyRejection::SignatureInvalid);
        assert_eq!(
            verifier.check(&expired_token("42")).await.unwrap_err(),
            LegacyRejection::Expired
        );

        for token in [forged, expired_token("42"), "not-a-jwt".to_string(), String::new()] {
            assert_eq!(
                verifier.verify(&token).await.unwrap_err(),
                AuthError::InvalidCredential
            );
        }
    }

    #[tokio::test]
    async fn numeric_subject_from_old_tokens_is_accepted() {
        let store = Arc::new(MemoryLegacyStore::new());
        store.insert_account("42", "u@x.com", "oldpass", "poet");
        let verifier = verifier_with(&store);

        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({
                "user_id": 42,
                "exp": (Utc::now() + Duration::days(1)).timestamp()
            }),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(verifier.verify(&token).await.unwrap().id, "42");
    }
}
