use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),

    #[error("Database: {}", .0)]
    Db(#[from] sqlx::Error),

    #[error("Store: {}", .0)]
    Store(#[from] verse_core::store::StoreError),

    #[error("Migration: {}", .0)]
    Migration(#[from] verse_core::migration::MigrationError),

    #[error("Identity provider: {}", .0)]
    Provider(#[from] verse_core::provider::ProviderError),

    #[error("Json: {}", .0)]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {}", .0)]
    Url(#[from] url::ParseError),
}
