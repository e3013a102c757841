//! PostgreSQL implementations of the store traits.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{LegacyStore, MigrationJournal, OwnerTable, ReferenceStore, StoreError};
use crate::models::auth::LegacyAccountRecord;
use crate::models::migration::{MigrationReceipt, MigrationState, PendingMigration};
use crate::uuid::uuidv7;

type LegacyRow = (String, String, String, Option<String>, DateTime<Utc>);

type PendingRow = (
    String,
    String,
    String,
    String,
    bool,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn legacy_from_row((id, email, password_hash, username, created_at): LegacyRow) -> LegacyAccountRecord {
    // Older rows have no username; fall back to the email local part.
    let username = username
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    LegacyAccountRecord {
        id,
        email,
        password_hash,
        username,
        created_at,
    }
}

fn pending_from_row(row: PendingRow) -> Result<PendingMigration, StoreError> {
    let (legacy_id, new_id, email, state, confirmation_pending, created_at, claimed_at) = row;
    let state = MigrationState::parse(&state)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown migration state '{state}'")))?;
    Ok(PendingMigration {
        legacy_id,
        new_id,
        email,
        state,
        confirmation_pending,
        created_at,
        claimed_at,
    })
}

// ---------------------------------------------------------------------------
// Legacy accounts
// ---------------------------------------------------------------------------

/// Legacy accounts in the `users` table.
#[derive(Clone)]
pub struct PgLegacyStore {
    pool: PgPool,
}

impl PgLegacyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LegacyStore for PgLegacyStore {
    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<LegacyAccountRecord>, StoreError> {
        let row = sqlx::query_as::<_, LegacyRow>(
            "SELECT id::text, email, password_hash, username, created_at \
             FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(legacy_from_row))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<LegacyAccountRecord>, StoreError> {
        let row = sqlx::query_as::<_, LegacyRow>(
            "SELECT id::text, email, password_hash, username, created_at \
             FROM users WHERE id::text = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(legacy_from_row))
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id::text = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Owner-keyed tables
// ---------------------------------------------------------------------------

/// Owner column updates on any table with a text `user_id` column.
#[derive(Clone)]
pub struct PgReferenceStore {
    pool: PgPool,
}

impl PgReferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceStore for PgReferenceStore {
    async fn update_owner(
        &self,
        table: &OwnerTable,
        old_owner: &str,
        new_owner: &str,
    ) -> Result<u64, StoreError> {
        // Table names cannot be bound; OwnerTable only holds plain identifiers.
        let sql = format!("UPDATE \"{table}\" SET user_id = $1 WHERE user_id = $2");
        let result = sqlx::query(&sql)
            .bind(new_owner)
            .bind(old_owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_owned_by_legacy(&self, table: &OwnerTable) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM \"{table}\" t \
             WHERE EXISTS (SELECT 1 FROM users u WHERE u.id::text = t.user_id)"
        );
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Migration journal
// ---------------------------------------------------------------------------

/// Journal in `pending_migrations`, receipts in `migration_receipts`.
#[derive(Clone)]
pub struct PgMigrationJournal {
    pool: PgPool,
}

impl PgMigrationJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All receipts, oldest first.
    pub async fn receipts(&self) -> Result<Vec<MigrationReceipt>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, DateTime<Utc>, i64)>(
            "SELECT legacy_id, new_id, migrated_at, references_updated \
             FROM migration_receipts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(legacy_id, new_id, migrated_at, references_updated)| MigrationReceipt {
                    legacy_id,
                    new_id,
                    migrated_at,
                    references_updated: u64::try_from(references_updated).unwrap_or_default(),
                },
            )
            .collect())
    }
}

#[async_trait]
impl MigrationJournal for PgMigrationJournal {
    async fn record_provisioned(&self, entry: &PendingMigration) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pending_migrations \
             (legacy_id, new_id, email, state, confirmation_pending, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (legacy_id) DO NOTHING",
        )
        .bind(&entry.legacy_id)
        .bind(&entry.new_id)
        .bind(&entry.email)
        .bind(MigrationState::Provisioned.as_str())
        .bind(entry.confirmation_pending)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, legacy_id: &str) -> Result<Option<PendingMigration>, StoreError> {
        let row = sqlx::query_as::<_, PendingRow>(
            "SELECT legacy_id, new_id, email, state, confirmation_pending, created_at, claimed_at \
             FROM pending_migrations WHERE legacy_id = $1",
        )
        .bind(legacy_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(pending_from_row).transpose()
    }

    async fn claim(&self, legacy_id: &str, stale_after: Duration) -> Result<bool, StoreError> {
        let stale_secs = stale_after.as_secs_f64();
        let result = sqlx::query(
            "UPDATE pending_migrations SET state = 'remapping', claimed_at = now() \
             WHERE legacy_id = $1 \
               AND (state = 'provisioned' \
                    OR (state = 'remapping' \
                        AND claimed_at < now() - make_interval(secs => $2::double precision)))",
        )
        .bind(legacy_id)
        .bind(stale_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, legacy_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE pending_migrations SET state = 'provisioned', claimed_at = NULL \
             WHERE legacy_id = $1 AND state = 'remapping'",
        )
        .bind(legacy_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, receipt: &MigrationReceipt) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE pending_migrations SET state = 'completed', confirmation_pending = false \
             WHERE legacy_id = $1",
        )
        .bind(&receipt.legacy_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO migration_receipts \
             (id, legacy_id, new_id, migrated_at, references_updated) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (legacy_id) DO NOTHING",
        )
        .bind(uuidv7())
        .bind(&receipt.legacy_id)
        .bind(&receipt.new_id)
        .bind(receipt.migrated_at)
        .bind(i64::try_from(receipt.references_updated).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<PendingMigration>, StoreError> {
        let rows = sqlx::query_as::<_, PendingRow>(
            "SELECT legacy_id, new_id, email, state, confirmation_pending, created_at, claimed_at \
             FROM pending_migrations WHERE state <> 'completed' ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(pending_from_row).collect()
    }

    async fn count_completed(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM pending_migrations WHERE state = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_falls_back_to_email_local_part() {
        let record = legacy_from_row((
            "7".into(),
            "reader@verse.app".into(),
            "$2b$04$x".into(),
            None,
            Utc::now(),
        ));
        assert_eq!(record.username, "reader");
    }

    #[test]
    fn unknown_state_is_reported_as_corrupt() {
        let row: PendingRow = (
            "7".into(),
            "n-1".into(),
            "reader@verse.app".into(),
            "half-done".into(),
            false,
            Utc::now(),
            None,
        );
        assert!(matches!(pending_from_row(row), Err(StoreError::Corrupt(_))));
    }
}
