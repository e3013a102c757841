use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "verse_cli", version, about = "Operate the Verse identity migration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print how many accounts and rows are still on the legacy scheme
    Status {
        #[command(flatten)]
        db: DbArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Finish deferred and interrupted migrations once
    Reconcile {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List migration receipts, oldest first
    Receipts {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
pub struct DbArgs {
    /// PostgreSQL connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/verse"
    )]
    pub database_url: String,

    /// Comma-separated tables whose `user_id` follows a migrated user
    #[arg(long, env = "OWNER_TABLES", default_value = "articles,comments")]
    pub owner_tables: String,
}

#[derive(Args, Debug)]
pub struct ProviderArgs {
    /// Base URL of the managed identity provider
    #[arg(
        long,
        env = "IDENTITY_PROVIDER_URL",
        default_value = "http://localhost:9999"
    )]
    pub provider_url: String,

    #[arg(long, env = "IDENTITY_PROVIDER_ANON_KEY", default_value = "")]
    pub provider_anon_key: String,

    /// Service-role key, needed to observe email confirmation
    #[arg(long, env = "IDENTITY_PROVIDER_SERVICE_KEY")]
    pub provider_service_key: Option<String>,

    #[arg(long, env = "PROVIDER_TIMEOUT_MS", default_value_t = 5000)]
    pub provider_timeout_ms: u64,

    #[arg(long, env = "MIGRATION_CLAIM_TIMEOUT_SECS", default_value_t = 600)]
    pub claim_timeout_secs: u64,
}
