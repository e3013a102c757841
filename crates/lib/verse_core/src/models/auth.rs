//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! bodies (which have their own `#[serde(rename)]` conventions).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Free-form identity metadata (provider `user_metadata`, legacy username).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which credential scheme authenticated a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// External identity provider session.
    Managed,
    /// Self-issued HS256 token backed by the legacy `users` table.
    Legacy,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Managed => f.write_str("managed"),
            Scheme::Legacy => f.write_str("legacy"),
        }
    }
}

/// A verified caller identity, regardless of the scheme that produced it.
///
/// Built fresh by a verifier on every successful verification and owned by
/// the request that resolved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub scheme: Scheme,
}

impl Identity {
    /// Build an identity from a legacy account row.
    ///
    /// Legacy accounts never had an email confirmation step, so they are
    /// treated as confirmed.
    pub fn from_legacy(record: &LegacyAccountRecord) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            "username".into(),
            serde_json::Value::String(record.username.clone()),
        );
        Self {
            id: record.id.clone(),
            email: record.email.clone(),
            display_name: record.username.clone(),
            email_confirmed: true,
            created_at: record.created_at,
            metadata,
            scheme: Scheme::Legacy,
        }
    }
}

/// Result of a successful resolution: who the caller is and how they proved it.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub identity: Identity,
    pub scheme: Scheme,
    /// The bearer token exactly as presented.
    pub raw_credential: String,
}

impl AuthOutcome {
    pub fn new(identity: Identity, raw_credential: impl Into<String>) -> Self {
        Self {
            scheme: identity.scheme,
            identity,
            raw_credential: raw_credential.into(),
        }
    }
}

/// Row of the legacy `users` table.
#[derive(Debug, Clone)]
pub struct LegacyAccountRecord {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Claims of a legacy self-issued token.
///
/// The wire shape is `{"user_id": <id>, "exp": <unix seconds>}`; `user_id`
/// was written as a number for integer-keyed accounts and as a string for
/// the rest, so both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyClaims {
    #[serde(rename = "user_id", deserialize_with = "string_or_number")]
    pub subject_id: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

/// Token pair issued by the managed identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        UInt(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::UInt(n) => n.to_string(),
    })
}
