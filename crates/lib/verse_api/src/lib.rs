//! # verse_api
//!
//! HTTP API library for Verse.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use verse_core::auth::guard::AccessGuard;
use verse_core::auth::legacy::LegacyVerifier;
use verse_core::auth::login::HybridLogin;
use verse_core::auth::managed::ManagedVerifier;
use verse_core::auth::resolver::IdentityResolver;
use verse_core::migration::MigrationCoordinator;
use verse_core::provider::ManagedIdentityProvider;
use verse_core::store::{LegacyStore, MigrationJournal, ReferenceStore};

use crate::config::ApiConfig;
use crate::handlers::{auth, health, migrate};

/// Storage and provider implementations the API runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub legacy: Arc<dyn LegacyStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub journal: Arc<dyn MigrationJournal>,
    pub provider: Arc<dyn ManagedIdentityProvider>,
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: AccessGuard,
    pub login: Arc<HybridLogin>,
    pub coordinator: MigrationCoordinator,
    pub provider: Arc<dyn ManagedIdentityProvider>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    /// Wire verifiers, resolver, guard, login and coordinator.
    pub fn new(config: ApiConfig, parts: Collaborators) -> Self {
        let legacy_verifier = Arc::new(LegacyVerifier::new(
            config.legacy_jwt_secret.as_bytes(),
            parts.legacy.clone(),
        ));
        let managed_verifier = Arc::new(ManagedVerifier::new(
            parts.provider.clone(),
            config.provider_timeout,
        ));
        let resolver = IdentityResolver::new(managed_verifier, legacy_verifier.clone());

        let login = HybridLogin::new(
            parts.provider.clone(),
            parts.legacy.clone(),
            legacy_verifier,
            config.provider_timeout,
        );
        let coordinator = MigrationCoordinator::new(
            parts.legacy,
            parts.references,
            parts.journal,
            parts.provider.clone(),
            config.migration_config(),
        );

        Self {
            guard: AccessGuard::new(resolver),
            login: Arc::new(login),
            coordinator,
            provider: parts.provider,
            config,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `verse_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    verse_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_API_HEALTH, get(health::health))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(auth::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        )
        .route(routes::POST_AUTH_VERIFY_TOKEN, post(auth::verify_token_handler))
        .route(routes::POST_AUTH_MIGRATE, post(migrate::migrate_handler));

    // Caller identity resolved when present, never required
    let optional = Router::new()
        .route(
            routes::GET_AUTH_MIGRATION_STATUS,
            get(auth::migration_status_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::optional_auth,
        ));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(optional)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
