//! Verse API server binary.
//!
//! Serves the hybrid authentication API and runs the migration
//! reconciliation job in the background.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use verse_api::config::ApiConfig;
use verse_api::{AppState, Collaborators};
use verse_core::migration::MigrationCoordinator;
use verse_core::provider::gotrue::{GoTrueConfig, GoTrueProvider};
use verse_core::store::postgres::{PgLegacyStore, PgMigrationJournal, PgReferenceStore};

/// CLI arguments. Everything else comes from the environment (see `ApiConfig`).
#[derive(Parser, Debug)]
#[command(name = "verse_server", about = "Verse API server", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/verse"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Do not run the background reconciliation job.
    #[arg(long, default_value_t = false)]
    no_reconcile: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,verse_api=debug,verse_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    config.bind_addr = args.bind_addr;
    config.pg_connection_url = args.database_url;

    info!(bind_addr = %config.bind_addr, provider = %config.provider_url, "starting verse_server");
    if config.provider_service_key.is_none() {
        warn!("IDENTITY_PROVIDER_SERVICE_KEY is not set; deferred migrations cannot be reconciled");
    }

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    // Run database migrations.
    info!("running database migrations");
    verse_api::migrate(&pool).await?;

    let provider = GoTrueProvider::new(GoTrueConfig {
        base_url: config.provider_url.clone(),
        anon_key: config.provider_anon_key.clone(),
        service_key: config.provider_service_key.clone(),
        timeout: config.provider_timeout,
    })?;

    let reconcile_interval = config.reconcile_interval;
    let state = AppState::new(
        config.clone(),
        Collaborators {
            legacy: Arc::new(PgLegacyStore::new(pool.clone())),
            references: Arc::new(PgReferenceStore::new(pool.clone())),
            journal: Arc::new(PgMigrationJournal::new(pool)),
            provider: Arc::new(provider),
        },
    );

    let shutdown = CancellationToken::new();
    let reconciler = (!args.no_reconcile).then(|| {
        tokio::spawn(run_reconciler(
            state.coordinator.clone(),
            reconcile_interval,
            shutdown.clone(),
        ))
    });

    let app = verse_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let api_result = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                    _ = shutdown.cancelled() => {}
                }
            }
        })
        .await;

    // When the REST API exits, also stop the reconciler.
    shutdown.cancel();
    if let Some(handle) = reconciler {
        let _ = handle.await;
    }

    api_result?;

    Ok(())
}

/// Finish deferred and interrupted migrations on a fixed interval.
async fn run_reconciler(
    coordinator: MigrationCoordinator,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "migration reconciler started");
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = coordinator.reconcile().await {
                    error!(error = %e, "reconcile pass failed");
                }
            }
        }
    }
    info!("migration reconciler stopped");
}
