//! GoTrue-compatible managed identity provider.
//!
//! Talks to the provider's REST API (`/auth/v1/...`). Public endpoints are
//! called with the anon key in the `apikey` header; the admin lookups use the
//! service key as a bearer token. Every request is bounded by the configured
//! timeout so a provider outage surfaces as [`ProviderError::Unavailable`]
//! instead of a hung request.
//!
//! With email confirmations switched on, GoTrue answers a sign-up for an
//! email it already knows with `200` and an obfuscated user whose
//! `identities` list is empty, instead of an error. That answer is reported
//! as [`ProviderError::Conflict`] like the explicit `422`/`409` forms.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{ManagedIdentityProvider, NewIdentity, ProviderError, Provisioned};
use crate::models::auth::{Identity, Metadata, Scheme, Session};

/// Default bound on a single provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for a GoTrue deployment.
#[derive(Debug, Clone)]
pub struct GoTrueConfig {
    pub base_url: Url,
    pub anon_key: String,
    /// Needed only for the admin lookups
    /// ([`ManagedIdentityProvider::fetch_identity`] and
    /// [`ManagedIdentityProvider::find_identity_by_email`]).
    pub service_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    user_metadata: Option<Metadata>,
    /// Linked sign-in identities; empty on an obfuscated duplicate sign-up.
    #[serde(default)]
    identities: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct AdminUserList {
    #[serde(default)]
    users: Vec<GoTrueUser>,
}

#[derive(Debug, Deserialize)]
struct GoTrueSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
    #[serde(default = "bearer")]
    token_type: String,
    user: GoTrueUser,
}

/// Sign-up returns a session when the identity is immediately usable and the
/// bare user when email confirmation is required.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(GoTrueSession),
    User(GoTrueUser),
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: &'a Metadata,
}

fn bearer() -> String {
    "bearer".to_string()
}

impl GoTrueUser {
    fn is_obfuscated(&self) -> bool {
        self.identities.as_ref().is_some_and(Vec::is_empty)
    }

    fn into_identity(self) -> Identity {
        let metadata = self.user_metadata.unwrap_or_default();
        let email = self.email.unwrap_or_default();
        let display_name = ["display_name", "username"]
            .iter()
            .find_map(|k| metadata.get(*k).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Identity {
            id: self.id,
            email,
            display_name,
            email_confirmed: self.email_confirmed_at.is_some(),
            created_at: self.created_at,
            metadata,
            scheme: Scheme::Managed,
        }
    }
}

impl GoTrueSession {
    fn split(self) -> (Identity, Session) {
        let session = Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            token_type: self.token_type,
        };
        (self.user.into_identity(), session)
    }
}

/// HTTP client for a GoTrue deployment.
#[derive(Clone)]
pub struct GoTrueProvider {
    client: Client,
    config: GoTrueConfig,
}

impl GoTrueProvider {
    pub fn new(config: GoTrueConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/auth/v1/{path}",
            self.config.base_url.as_str().trim_end_matches('/')
        )
    }

    fn public(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.config.anon_key)
    }

    fn admin(&self, builder: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        let service_key = self
            .config
            .service_key
            .as_deref()
            .ok_or_else(|| ProviderError::Rejected("service key not configured".into()))?;
        Ok(builder.header("apikey", service_key).bearer_auth(service_key))
    }

    /// Accept any 2xx without reading a body.
    async fn expect_success(resp: Response) -> Result<(), ProviderError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Unavailable("request timed out".into())
            } else {
                ProviderError::Unavailable(format!("request failed: {e}"))
            }
        })
    }

    async fn parse<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, ProviderError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(status_error(status, &body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("response parse error: {e}")))
    }
}

/// Map a non-success status onto the provider error taxonomy.
fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let lowered = body.to_ascii_lowercase();
    if status == StatusCode::CONFLICT
        || lowered.contains("already registered")
        || lowered.contains("user_already_exists")
        || lowered.contains("email_exists")
    {
        return ProviderError::Conflict;
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::Unavailable(format!("{status}"));
    }
    ProviderError::Rejected(format!("{status} {body}"))
}

#[async_trait]
impl ManagedIdentityProvider for GoTrueProvider {
    async fn create_identity(&self, request: NewIdentity) -> Result<Provisioned, ProviderError> {
        let builder = self.public(self.client.post(self.endpoint("signup"))).json(
            &SignUpRequest {
                email: &request.email,
                password: &request.password,
                data: &request.metadata,
            },
        );
        let resp = self.send(builder).await?;
        match Self::parse::<SignUpResponse>(resp).await? {
            SignUpResponse::Session(session) => {
                let (identity, session) = session.split();
                Ok(Provisioned {
                    identity,
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) if user.is_obfuscated() => {
                debug!("sign-up answered with an obfuscated user: email already registered");
                Err(ProviderError::Conflict)
            }
            SignUpResponse::User(user) => {
                debug!(id = %user.id, "sign-up pending email confirmation");
                Ok(Provisioned {
                    identity: user.into_identity(),
                    session: None,
                })
            }
        }
    }

    async fn verify_session(&self, access_token: &str) -> Result<Identity, ProviderError> {
        let builder = self
            .public(self.client.get(self.endpoint("user")))
            .bearer_auth(access_token);
        let resp = self.send(builder).await?;
        let user = Self::parse::<GoTrueUser>(resp).await?;
        Ok(user.into_identity())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ProviderError> {
        let builder = self
            .public(
                self.client
                    .post(self.endpoint("token?grant_type=refresh_token")),
            )
            .json(&json!({ "refresh_token": refresh_token }));
        let resp = self.send(builder).await?;
        let session = Self::parse::<GoTrueSession>(resp).await?;
        Ok(session.split().1)
    }

    async fn reset_credential(&self, email: &str) -> Result<(), ProviderError> {
        let builder = self
            .public(self.client.post(self.endpoint("recover")))
            .json(&json!({ "email": email }));
        let resp = self.send(builder).await?;
        Self::expect_success(resp).await
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, Session), ProviderError> {
        let builder = self
            .public(self.client.post(self.endpoint("token?grant_type=password")))
            .json(&json!({ "email": email, "password": password }));
        let resp = self.send(builder).await?;
        let session = Self::parse::<GoTrueSession>(resp).await?;
        Ok(session.split())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let builder = self
            .public(self.client.post(self.endpoint("logout")))
            .bearer_auth(access_token);
        let resp = self.send(builder).await?;
        Self::expect_success(resp).await
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        let builder = self
            .public(self.client.put(self.endpoint("user")))
            .bearer_auth(access_token)
            .json(&json!({ "password": new_password }));
        let resp = self.send(builder).await?;
        Self::parse::<GoTrueUser>(resp).await.map(|_| ())
    }

    async fn fetch_identity(&self, id: &str) -> Result<Option<Identity>, ProviderError> {
        let builder = self.admin(self.client.get(self.endpoint(&format!("admin/users/{id}"))))?;
        let resp = self.send(builder).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user = Self::parse::<GoTrueUser>(resp).await?;
        Ok(Some(user.into_identity()))
    }

    async fn find_identity_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Identity>, ProviderError> {
        let mut url = Url::parse(&self.endpoint("admin/users"))
            .map_err(|e| ProviderError::Unavailable(format!("admin url: {e}")))?;
        url.query_pairs_mut().append_pair("filter", email);
        let builder = self.admin(self.client.get(url))?;
        let resp = self.send(builder).await?;
        // `filter` is a substring match; keep only the exact address.
        let list = Self::parse::<AdminUserList>(resp).await?;
        Ok(list
            .users
            .into_iter()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .map(GoTrueUser::into_identity))
    }
}
