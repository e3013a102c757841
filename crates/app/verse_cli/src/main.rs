// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, DbArgs, ProviderArgs};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use url::Url;
use verse_core::migration::{
    MigrationConfig, MigrationCoordinator, MigrationStatus, ReconcileReport, migration_status,
};
use verse_core::models::migration::MigrationReceipt;
use verse_core::provider::gotrue::{GoTrueConfig, GoTrueProvider};
use verse_core::store::OwnerTable;
use verse_core::store::postgres::{PgLegacyStore, PgMigrationJournal, PgReferenceStore};

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::Status { db, json } => {
            let status = block_on(status(db))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Reconcile { db, provider, json } => {
            let report = block_on(reconcile(db, provider))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Receipts { db } => {
            let receipts = block_on(receipts(db))?;
            for r in &receipts {
                println!(
                    "{}  {} -> {}  ({} references)",
                    r.migrated_at.to_rfc3339(),
                    r.legacy_id,
                    r.new_id,
                    r.references_updated
                );
            }
            log::info!("{} receipts", receipts.len());
        }
    }

    Ok(())
}

fn block_on<T>(future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

async fn connect(db: &DbArgs) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&db.database_url)
        .await?;
    Ok(pool)
}

fn owner_tables(db: &DbArgs) -> Result<Vec<OwnerTable>> {
    let owner_tables = OwnerTable::parse_list(&db.owner_tables)?;
    if owner_tables.is_empty() {
        return Err(Error::Custom("at least one owner table is required".into()));
    }
    Ok(owner_tables)
}

/// Build a coordinator over PostgreSQL and the configured provider.
async fn coordinator(db: &DbArgs, provider: &ProviderArgs) -> Result<MigrationCoordinator> {
    let owner_tables = owner_tables(db)?;
    let provider_timeout = Duration::from_millis(provider.provider_timeout_ms);
    let gotrue = GoTrueProvider::new(GoTrueConfig {
        base_url: Url::parse(&provider.provider_url)?,
        anon_key: provider.provider_anon_key.clone(),
        service_key: provider.provider_service_key.clone(),
        timeout: provider_timeout,
    })?;

    let pool = connect(db).await?;
    Ok(MigrationCoordinator::new(
        Arc::new(PgLegacyStore::new(pool.clone())),
        Arc::new(PgReferenceStore::new(pool.clone())),
        Arc::new(PgMigrationJournal::new(pool)),
        Arc::new(gotrue),
        MigrationConfig {
            owner_tables,
            provider_timeout,
            claim_timeout: Duration::from_secs(provider.claim_timeout_secs),
        },
    ))
}

async fn status(db: &DbArgs) -> Result<MigrationStatus> {
    let owner_tables = owner_tables(db)?;
    let pool = connect(db).await?;
    Ok(migration_status(
        &PgLegacyStore::new(pool.clone()),
        &PgReferenceStore::new(pool.clone()),
        &PgMigrationJournal::new(pool),
        &owner_tables,
    )
    .await?)
}

async fn receipts(db: &DbArgs) -> Result<Vec<MigrationReceipt>> {
    let pool = connect(db).await?;
    Ok(PgMigrationJournal::new(pool).receipts().await?)
}

async fn reconcile(db: &DbArgs, provider: &ProviderArgs) -> Result<ReconcileReport> {
    if provider.provider_service_key.is_none() {
        log::warn!(
            "no service key: entries awaiting email confirmation will be reported as failed"
        );
    }
    Ok(coordinator(db, provider).await?.reconcile().await?)
}

fn print_status(status: &MigrationStatus) {
    println!("legacy accounts        {}", status.legacy_accounts);
    println!("unfinished migrations  {}", status.unfinished_migrations);
    println!("completed migrations   {}", status.completed_migrations);
    println!("rows owned by legacy ids:");
    for (table, count) in &status.legacy_owned_references {
        println!("  {table:<20} {count}");
    }
    if status.is_complete() {
        println!("migration complete");
    }
}

fn print_report(report: &ReconcileReport) {
    for r in &report.completed {
        println!(
            "completed {} -> {} ({} references)",
            r.legacy_id, r.new_id, r.references_updated
        );
    }
    println!(
        "{} completed, {} awaiting confirmation, {} failed",
        report.completed.len(),
        report.still_pending,
        report.failed
    );
}
