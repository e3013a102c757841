//! The migration coordinator.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::{MIN_PASSWORD_LEN, MigrationConfig, MigrationError};
use crate::auth::password::verify_password;
use crate::models::auth::{Identity, LegacyAccountRecord, Metadata, Session};
use crate::models::migration::{
    MigrationOutcome, MigrationReceipt, MigrationState, MigrationStep, PendingMigration,
};
use crate::provider::{ManagedIdentityProvider, NewIdentity, ProviderError};
use crate::store::{LegacyStore, MigrationJournal, ReferenceStore};

/// Runs identity migrations.
///
/// Migrations of different accounts share nothing and may run in parallel.
/// For one account, the provider's email uniqueness stops a second
/// provisioning and the journal claim stops a second completion.
#[derive(Clone)]
pub struct MigrationCoordinator {
    pub(super) legacy: Arc<dyn LegacyStore>,
    pub(super) references: Arc<dyn ReferenceStore>,
    pub(super) journal: Arc<dyn MigrationJournal>,
    pub(super) provider: Arc<dyn ManagedIdentityProvider>,
    pub(super) config: MigrationConfig,
}

impl MigrationCoordinator {
    pub fn new(
        legacy: Arc<dyn LegacyStore>,
        references: Arc<dyn ReferenceStore>,
        journal: Arc<dyn MigrationJournal>,
        provider: Arc<dyn ManagedIdentityProvider>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            legacy,
            references,
            journal,
            provider,
            config,
        }
    }

    /// Migrate one legacy account to a managed identity.
    ///
    /// Re-running after a `PartialMigration` error resumes from the journal.
    /// Running it for an account that has already been migrated fails with
    /// `UnknownAccount` because the legacy record is gone.
    pub async fn migrate(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<MigrationOutcome, MigrationError> {
        let email = email.trim();
        if email.is_empty() || current_password.is_empty() || new_password.is_empty() {
            return Err(MigrationError::Validation(
                "email, current password and new password are required".into(),
            ));
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(MigrationError::Validation(format!(
                "New password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        // Locate
        let record = self
            .legacy
            .find_by_email(email)
            .await?
            .ok_or(MigrationError::UnknownAccount)?;

        // Authenticate
        if !verify_password(current_password, &record.password_hash) {
            warn!(legacy_id = %record.id, "migration refused: wrong current password");
            return Err(MigrationError::WrongCredential);
        }

        // An earlier attempt got past provisioning: resume it.
        if let Some(entry) = self.journal.find(&record.id).await? {
            info!(legacy_id = %entry.legacy_id, new_id = %entry.new_id, "resuming journaled migration");
            return self.resume(entry).await;
        }

        // Provision
        let provisioned = match self
            .with_timeout(self.provider.create_identity(NewIdentity {
                email: record.email.clone(),
                password: new_password.to_string(),
                metadata: migration_metadata(&record),
            }))
            .await
        {
            Ok(provisioned) => provisioned,
            Err(ProviderError::Conflict) => return self.adopt_provisioned(&record).await,
            Err(e) => return Err(MigrationError::Provider(e)),
        };

        let new_id = provisioned.identity.id.clone();
        let entry = PendingMigration {
            legacy_id: record.id.clone(),
            new_id: new_id.clone(),
            email: record.email.clone(),
            state: MigrationState::Provisioned,
            confirmation_pending: provisioned.session.is_none(),
            created_at: Utc::now(),
            claimed_at: None,
        };
        if let Err(e) = self.journal.record_provisioned(&entry).await {
            return Err(self.partial(&record.id, &new_id, MigrationStep::Journal, e.to_string()));
        }
        info!(legacy_id = %record.id, %new_id, "managed identity provisioned");

        match provisioned.session {
            Some(session) => {
                let receipt = self.finish(&record.id, &new_id).await?;
                Ok(MigrationOutcome::Completed {
                    receipt,
                    session: Some(session),
                })
            }
            None => {
                info!(legacy_id = %record.id, %new_id, "remap deferred until email confirmation");
                Ok(MigrationOutcome::Deferred {
                    legacy_id: record.id,
                    new_id,
                })
            }
        }
    }

    /// The provider already has an identity for this email but the journal
    /// has no entry: an earlier attempt provisioned it and then failed to
    /// journal it, or lost the provider's answer to a timeout. Journal that
    /// identity and carry on, provided it was created for this legacy account.
    async fn adopt_provisioned(
        &self,
        record: &LegacyAccountRecord,
    ) -> Result<MigrationOutcome, MigrationError> {
        let existing = match self
            .with_timeout(self.provider.find_identity_by_email(&record.email))
            .await
        {
            Ok(existing) => existing,
            Err(ProviderError::Unavailable(msg)) => {
                return Err(MigrationError::Provider(ProviderError::Unavailable(msg)));
            }
            Err(e) => {
                warn!(legacy_id = %record.id, error = %e, "cannot look up the existing managed identity");
                return Err(MigrationError::AlreadyInProgress);
            }
        };
        let Some(identity) = existing.filter(|i| provisioned_for(i, &record.id)) else {
            warn!(legacy_id = %record.id, "email is taken by a managed identity of another origin");
            return Err(MigrationError::Provider(ProviderError::Conflict));
        };

        let entry = PendingMigration {
            legacy_id: record.id.clone(),
            new_id: identity.id.clone(),
            email: record.email.clone(),
            state: MigrationState::Provisioned,
            confirmation_pending: !identity.email_confirmed,
            created_at: Utc::now(),
            claimed_at: None,
        };
        if let Err(e) = self.journal.record_provisioned(&entry).await {
            return Err(self.partial(
                &record.id,
                &identity.id,
                MigrationStep::Journal,
                e.to_string(),
            ));
        }
        info!(legacy_id = %record.id, new_id = %identity.id, "adopted managed identity from an earlier attempt");

        // A concurrent attempt may have journaled first; its entry wins.
        let entry = self.journal.find(&record.id).await?.unwrap_or(entry);
        self.resume(entry).await
    }

    /// Continue a journaled migration if its managed identity is usable.
    async fn resume(&self, entry: PendingMigration) -> Result<MigrationOutcome, MigrationError> {
        if entry.confirmation_pending && !self.identity_confirmed(&entry).await? {
            return Ok(MigrationOutcome::Deferred {
                legacy_id: entry.legacy_id,
                new_id: entry.new_id,
            });
        }
        let receipt = self.finish(&entry.legacy_id, &entry.new_id).await?;
        Ok(MigrationOutcome::Completed {
            receipt,
            session: None::<Session>,
        })
    }

    /// Whether the provider reports the journaled identity's email as confirmed.
    pub(super) async fn identity_confirmed(
        &self,
        entry: &PendingMigration,
    ) -> Result<bool, MigrationError> {
        match self
            .with_timeout(self.provider.fetch_identity(&entry.new_id))
            .await
        {
            Ok(Some(identity)) => Ok(identity.email_confirmed),
            Ok(None) => Err(self.partial(
                &entry.legacy_id,
                &entry.new_id,
                MigrationStep::Remap,
                "managed identity no longer exists".into(),
            )),
            Err(e) => Err(MigrationError::Provider(e)),
        }
    }

    /// Claim the migration, then remap, retire and write the receipt.
    pub(super) async fn finish(
        &self,
        legacy_id: &str,
        new_id: &str,
    ) -> Result<MigrationReceipt, MigrationError> {
        let claimed = self
            .journal
            .claim(legacy_id, self.config.claim_timeout)
            .await
            .map_err(|e| self.partial(legacy_id, new_id, MigrationStep::Journal, e.to_string()))?;
        if !claimed {
            return Err(MigrationError::AlreadyInProgress);
        }

        match self.remap_and_retire(legacy_id, new_id).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                if let Err(release_err) = self.journal.release(legacy_id).await {
                    // The claim goes stale after the claim timeout and is retaken then.
                    warn!(legacy_id, error = %release_err, "failed to release migration claim");
                }
                Err(e)
            }
        }
    }

    async fn remap_and_retire(
        &self,
        legacy_id: &str,
        new_id: &str,
    ) -> Result<MigrationReceipt, MigrationError> {
        // Remap
        let mut references_updated = self.remap_owners(legacy_id, new_id).await?;

        // Retire
        self.legacy
            .delete_by_id(legacy_id)
            .await
            .map_err(|e| self.partial(legacy_id, new_id, MigrationStep::Retire, e.to_string()))?;

        // Legacy-token callers could write under the old id until the record
        // was gone; sweep once more so none of their rows dangle.
        let late = self.remap_owners(legacy_id, new_id).await?;
        if late > 0 {
            warn!(legacy_id, new_id, late, "rows written under the legacy id during the remap");
        }
        references_updated += late;

        let receipt = MigrationReceipt {
            legacy_id: legacy_id.to_string(),
            new_id: new_id.to_string(),
            migrated_at: Utc::now(),
            references_updated,
        };
        self.journal
            .complete(&receipt)
            .await
            .map_err(|e| self.partial(legacy_id, new_id, MigrationStep::Receipt, e.to_string()))?;

        info!(legacy_id, new_id, references_updated, "identity migration completed");
        Ok(receipt)
    }

    /// Move every owner table from `legacy_id` to `new_id`; rows moved.
    async fn remap_owners(&self, legacy_id: &str, new_id: &str) -> Result<u64, MigrationError> {
        let mut moved_total = 0u64;
        for table in &self.config.owner_tables {
            let moved = self
                .references
                .update_owner(table, legacy_id, new_id)
                .await
                .map_err(|e| {
                    self.partial(
                        legacy_id,
                        new_id,
                        MigrationStep::Remap,
                        format!("{table}: {e}"),
                    )
                })?;
            info!(legacy_id, new_id, %table, moved, "owner column remapped");
            moved_total += moved;
        }
        Ok(moved_total)
    }

    fn partial(
        &self,
        legacy_id: &str,
        new_id: &str,
        step: MigrationStep,
        reason: String,
    ) -> MigrationError {
        error!(
            legacy_id,
            new_id,
            %step,
            %reason,
            "identity migration stopped after provisioning; rerun migrate or reconcile to resume"
        );
        MigrationError::PartialMigration {
            legacy_id: legacy_id.to_string(),
            new_id: new_id.to_string(),
            step,
            reason,
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        timeout(self.config.provider_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ProviderError::Unavailable("request timed out".into())))
    }
}

fn provisioned_for(identity: &Identity, legacy_id: &str) -> bool {
    identity
        .metadata
        .get("migrated_from")
        .and_then(Value::as_str)
        .is_some_and(|from| from == legacy_id)
}

/// Metadata stamped on the new identity so it can be traced to its origin.
fn migration_metadata(record: &LegacyAccountRecord) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("username".into(), Value::String(record.username.clone()));
    metadata.insert("display_name".into(), Value::String(record.username.clone()));
    metadata.insert("migrated_from".into(), Value::String(record.id.clone()));
    metadata.insert("migrated_at".into(), Value::String(Utc::now().to_rfc3339()));
    metadata
}
