//! Reconciliation of journaled migrations.
//!
//! Picks up migrations that stopped after provisioning: remaps deferred by
//! email confirmation, and attempts that failed at remap, retire or receipt.

use serde::Serialize;
use tracing::{info, warn};

use super::coordinator::MigrationCoordinator;
use super::MigrationError;
use crate::models::migration::MigrationReceipt;

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub completed: Vec<MigrationReceipt>,
    /// Still waiting for the identity's email confirmation.
    pub still_pending: usize,
    /// Claimed by another worker, or failed again this pass.
    pub failed: usize,
}

impl MigrationCoordinator {
    /// Finish every unfinished journaled migration that can be finished now.
    pub async fn reconcile(&self) -> Result<ReconcileReport, MigrationError> {
        let unfinished = self.journal.list_unfinished().await?;
        let mut report = ReconcileReport::default();

        for entry in unfinished {
            if entry.confirmation_pending {
                match self.identity_confirmed(&entry).await {
                    Ok(true) => {}
                    Ok(false) => {
                        report.still_pending += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(legacy_id = %entry.legacy_id, error = %e, "could not check email confirmation");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            match self.finish(&entry.legacy_id, &entry.new_id).await {
                Ok(receipt) => report.completed.push(receipt),
                Err(MigrationError::AlreadyInProgress) => {
                    info!(legacy_id = %entry.legacy_id, "migration is being finished elsewhere");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(legacy_id = %entry.legacy_id, error = %e, "reconcile attempt failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            completed = report.completed.len(),
            still_pending = report.still_pending,
            failed = report.failed,
            "reconcile pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::{
        MemoryIdentityProvider, MemoryJournal, MemoryLegacyStore, MemoryReferenceStore,
    };
    use crate::migration::MigrationConfig;
    use crate::models::migration::{MigrationOutcome, MigrationState};
    use crate::store::MigrationJournal;

    fn setup() -> (
        MigrationCoordinator,
        Arc<MemoryLegacyStore>,
        Arc<MemoryReferenceStore>,
        Arc<MemoryJournal>,
        Arc<MemoryIdentityProvider>,
    ) {
        let legacy = Arc::new(MemoryLegacyStore::new());
        legacy.insert_account("42", "u@x.com", "oldpass", "poet");
        let references = Arc::new(MemoryReferenceStore::new());
        references.insert_row("articles", "A1", "42");
        references.insert_row("comments", "C1", "42");
        let journal = Arc::new(MemoryJournal::new());
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider.require_confirmation(true);
        let coordinator = MigrationCoordinator::new(
            legacy.clone(),
            references.clone(),
            journal.clone(),
            provider.clone(),
            MigrationConfig::default(),
        );
        (coordinator, legacy, references, journal, provider)
    }

    #[tokio::test]
    async fn unconfirmed_identities_stay_pending() {
        let (coordinator, legacy, _, _, _) = setup();
        coordinator
            .migrate("u@x.com", "oldpass", "newpass123")
            .await
            .unwrap();

        let report = coordinator.reconcile().await.unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(report.still_pending, 1);
        assert!(legacy.contains("42"));
    }

    #[tokio::test]
    async fn confirmed_identities_are_completed_exactly_once() {
        let (coordinator, legacy, references, journal, provider) = setup();
        let outcome = coordinator
            .migrate("u@x.com", "oldpass", "newpass123")
            .await
            .unwrap();
        let MigrationOutcome::Deferred { new_id, .. } = outcome else {
            panic!("expected a deferred migration");
        };

        provider.confirm("u@x.com");
        let (first, second) = tokio::join!(coordinator.reconcile(), coordinator.reconcile());
        let completed = first.unwrap().completed.len() + second.unwrap().completed.len();
        assert_eq!(completed, 1);

        assert_eq!(journal.receipts().len(), 1);
        assert_eq!(journal.receipts()[0].new_id, new_id);
        assert_eq!(journal.receipts()[0].references_updated, 2);
        assert_eq!(journal.state_of("42"), Some(MigrationState::Completed));
        assert!(references.rows_owned_by("42").is_empty());
        assert!(!legacy.contains("42"));

        let idle = coordinator.reconcile().await.unwrap();
        assert!(idle.completed.is_empty());
        assert_eq!(idle.still_pending + idle.failed, 0);
    }

    #[tokio::test]
    async fn abandoned_claims_are_finished_after_the_timeout() {
        let (coordinator, legacy, _, journal, provider) = setup();
        provider.require_confirmation(false);
        legacy.fail_deletes(true);
        assert!(
            coordinator
                .migrate("u@x.com", "oldpass", "newpass123")
                .await
                .is_err()
        );
        legacy.fail_deletes(false);

        // Simulate a worker that died holding the claim.
        assert!(
            journal
                .claim("42", std::time::Duration::from_secs(600))
                .await
                .unwrap()
        );
        let blocked = coordinator.reconcile().await.unwrap();
        assert_eq!(blocked.failed, 1);

        journal.age_claim("42", std::time::Duration::from_secs(3600));
        let report = coordinator.reconcile().await.unwrap();
        assert_eq!(report.completed.len(), 1);
        assert!(!legacy.contains("42"));
    }
}
