//! Migration progress report.

use serde::Serialize;

use super::coordinator::MigrationCoordinator;
use super::MigrationError;
use crate::store::{LegacyStore, MigrationJournal, OwnerTable, ReferenceStore};

/// Snapshot of how far the migration off the legacy scheme has come.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    /// Accounts still on the legacy scheme.
    pub legacy_accounts: i64,
    /// Journaled migrations not yet completed.
    pub unfinished_migrations: i64,
    pub completed_migrations: i64,
    /// Per owner table, rows still owned by a legacy account.
    pub legacy_owned_references: Vec<(String, i64)>,
}

impl MigrationStatus {
    /// Nothing is left on the legacy scheme.
    pub fn is_complete(&self) -> bool {
        self.legacy_accounts == 0
            && self.unfinished_migrations == 0
            && self.legacy_owned_references.iter().all(|(_, n)| *n == 0)
    }
}

/// Read-only progress report straight from the stores; the identity
/// provider is not involved.
pub async fn migration_status(
    legacy: &dyn LegacyStore,
    references: &dyn ReferenceStore,
    journal: &dyn MigrationJournal,
    owner_tables: &[OwnerTable],
) -> Result<MigrationStatus, MigrationError> {
    let legacy_accounts = legacy.count().await?;
    let unfinished_migrations = journal.list_unfinished().await?.len() as i64;
    let completed_migrations = journal.count_completed().await?;

    let mut legacy_owned_references = Vec::with_capacity(owner_tables.len());
    for table in owner_tables {
        let count = references.count_owned_by_legacy(table).await?;
        legacy_owned_references.push((table.to_string(), count));
    }

    Ok(MigrationStatus {
        legacy_accounts,
        unfinished_migrations,
        completed_migrations,
        legacy_owned_references,
    })
}

impl MigrationCoordinator {
    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        migration_status(
            self.legacy.as_ref(),
            self.references.as_ref(),
            self.journal.as_ref(),
            &self.config.owner_tables,
        )
        .await
    }
}
