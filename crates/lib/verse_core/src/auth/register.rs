//! Sign-up for new accounts.
//!
//! New accounts are always managed identities. An email that still belongs to
//! a legacy account is refused so its owner goes through migration instead of
//! ending up with two accounts.

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use super::login::HybridLogin;
use crate::migration::MIN_PASSWORD_LEN;
use crate::models::auth::Metadata;
use crate::provider::{NewIdentity, ProviderError, Provisioned};
use crate::store::StoreError;

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid registration: {0}")]
    Validation(String),

    /// The email belongs to an account that has not migrated yet.
    #[error("A legacy account already uses this email")]
    LegacyAccount,

    #[error("Email already registered")]
    EmailTaken,

    #[error(transparent)]
    Provider(ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HybridLogin {
    /// Create a managed identity. The session is `None` when the provider
    /// wants the email confirmed first.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Result<Provisioned, RegistrationError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(RegistrationError::Validation(
                "email and password are required".into(),
            ));
        }
        if !is_plausible_email(email) {
            return Err(RegistrationError::Validation("Invalid email format".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(RegistrationError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if let Some(record) = self.legacy_store.find_by_email(email).await? {
            warn!(legacy_id = %record.id, "sign-up refused: email has a legacy account");
            return Err(RegistrationError::LegacyAccount);
        }

        let username = username
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_username(email));
        let mut metadata = Metadata::new();
        metadata.insert("username".into(), username.clone().into());
        metadata.insert("display_name".into(), username.into());

        let request = NewIdentity {
            email: email.to_string(),
            password: password.to_string(),
            metadata,
        };
        let provisioned = match timeout(self.timeout, self.provider.create_identity(request)).await
        {
            Ok(Ok(provisioned)) => provisioned,
            Ok(Err(ProviderError::Conflict)) => return Err(RegistrationError::EmailTaken),
            Ok(Err(e)) => return Err(RegistrationError::Provider(e)),
            Err(_) => {
                return Err(RegistrationError::Provider(ProviderError::Unavailable(
                    "sign-up timed out".into(),
                )));
            }
        };

        info!(
            id = %provisioned.identity.id,
            confirmation_pending = provisioned.session.is_none(),
            "managed identity registered"
        );
        Ok(provisioned)
    }
}

fn default_username(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// `local@domain.tld`, with a letters-only top-level label of two or more.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    local_ok && host_ok && tld_ok
}
