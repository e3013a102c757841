//! Online identity migration from the legacy scheme to the managed provider.
//!
//! A migration provisions a managed identity, moves ownership of every row in
//! the configured owner tables from the legacy id to the new id, deletes the
//! legacy account, and writes a receipt. The steps are not transactional;
//! instead every in-flight migration is journaled so that a retry (another
//! `migrate` call, or the reconciliation job) resumes where the last attempt
//! stopped without provisioning a second identity.

pub mod coordinator;
pub mod reconcile;
pub mod status;

use std::time::Duration;

use thiserror::Error;

use crate::models::migration::MigrationStep;
use crate::provider::ProviderError;
use crate::provider::gotrue::DEFAULT_PROVIDER_TIMEOUT;
use crate::store::{OwnerTable, StoreError};

pub use coordinator::MigrationCoordinator;
pub use reconcile::ReconcileReport;
pub use status::{MigrationStatus, migration_status};

/// Minimum length of the new managed password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A claim older than this is considered abandoned by a crashed worker.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Migration errors. Unlike authentication errors these are specific: the
/// caller has already shown they know the account's email.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No legacy account for this email")]
    UnknownAccount,

    #[error("Current password is incorrect")]
    WrongCredential,

    #[error("Migration already in progress for this account")]
    AlreadyInProgress,

    #[error("Migration of {legacy_id} to {new_id} stopped at {step}: {reason}")]
    PartialMigration {
        legacy_id: String,
        new_id: String,
        step: MigrationStep,
        reason: String,
    },

    #[error("Identity provider error: {0}")]
    Provider(ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Every table whose `user_id` must follow the user to the new identity.
    pub owner_tables: Vec<OwnerTable>,
    pub provider_timeout: Duration,
    pub claim_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            owner_tables: OwnerTable::defaults(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }
}
