//! Persistence collaborators of the auth core.
//!
//! The core only needs narrow capabilities from storage: look up and delete
//! legacy accounts, move ownership of rows between user ids, and journal
//! in-flight migrations. Each capability is a trait so the coordinator can be
//! driven by PostgreSQL in production and by in-memory fakes in tests.

pub mod postgres;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::LegacyAccountRecord;
use crate::models::migration::{MigrationReceipt, PendingMigration};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Invalid owner table name: {0}")]
    InvalidTable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Name of a table whose rows carry a `user_id` owner column.
///
/// Table names are interpolated into SQL, so only plain lowercase
/// identifiers are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerTable(String);

impl OwnerTable {
    pub fn new(name: &str) -> Result<Self, StoreError> {
        let valid = !name.is_empty()
            && name.len() <= 63
            && name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidTable(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a comma-separated list such as `articles,comments`.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, StoreError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::new)
            .collect()
    }

    /// Tables that reference users out of the box.
    pub fn defaults() -> Vec<Self> {
        vec![Self("articles".into()), Self("comments".into())]
    }
}

impl fmt::Display for OwnerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerTable {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Read/delete access to pre-migration accounts.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    async fn find_by_email(&self, email: &str)
    -> Result<Option<LegacyAccountRecord>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<LegacyAccountRecord>, StoreError>;

    /// Delete an account. Deleting an absent account is success.
    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError>;

    /// Number of accounts still on the legacy scheme.
    async fn count(&self) -> Result<i64, StoreError>;
}

/// Ownership updates across owner-keyed tables.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// `UPDATE table SET user_id = new_owner WHERE user_id = old_owner`.
    ///
    /// Idempotent: re-applying moves zero rows.
    async fn update_owner(
        &self,
        table: &OwnerTable,
        old_owner: &str,
        new_owner: &str,
    ) -> Result<u64, StoreError>;

    /// Rows of `table` whose owner is still a live legacy account.
    async fn count_owned_by_legacy(&self, table: &OwnerTable) -> Result<i64, StoreError>;
}

/// Durable record of migrations past the provisioning step.
#[async_trait]
pub trait MigrationJournal: Send + Sync {
    /// Record a freshly provisioned migration. Recording the same legacy id
    /// twice keeps the first entry.
    async fn record_provisioned(&self, entry: &PendingMigration) -> Result<(), StoreError>;

    async fn find(&self, legacy_id: &str) -> Result<Option<PendingMigration>, StoreError>;

    /// Take the exclusive right to finish a migration.
    ///
    /// Succeeds for `Provisioned` entries and for `Remapping` entries whose
    /// claim is older than `stale_after`. Returns `false` when someone else
    /// holds a live claim or the entry is already completed.
    async fn claim(&self, legacy_id: &str, stale_after: Duration) -> Result<bool, StoreError>;

    /// Give a claim back after a failed attempt.
    async fn release(&self, legacy_id: &str) -> Result<(), StoreError>;

    /// Mark the entry completed and append its receipt in one step.
    async fn complete(&self, receipt: &MigrationReceipt) -> Result<(), StoreError>;

    /// Entries not yet completed, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<PendingMigration>, StoreError>;

    async fn count_completed(&self) -> Result<i64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_table_accepts_plain_identifiers() {
        assert!(OwnerTable::new("articles").is_ok());
        assert!(OwnerTable::new("poem_likes_2").is_ok());
        assert!(OwnerTable::new("_shadow").is_ok());
    }

    #[test]
    fn owner_table_rejects_injection() {
        for bad in ["", "Articles", "articles; drop table users", "a-b", "1abc", "a.b"] {
            assert!(OwnerTable::new(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn owner_table_list_parsing() {
        let tables = OwnerTable::parse_list(" articles, comments ,").unwrap();
        assert_eq!(tables, OwnerTable::defaults());
        assert!(OwnerTable::parse_list("articles,bad name").is_err());
    }
}
