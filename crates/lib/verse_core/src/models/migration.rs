//! Identity migration models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::Session;

/// Audit record of one completed migration. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReceipt {
    pub legacy_id: String,
    pub new_id: String,
    pub migrated_at: DateTime<Utc>,
    pub references_updated: u64,
}

/// Lifecycle of a journaled migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Managed identity exists; references still point at the legacy id.
    Provisioned,
    /// A caller holds the claim and is remapping / retiring.
    Remapping,
    /// Receipt emitted, legacy record gone.
    Completed,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Provisioned => "provisioned",
            MigrationState::Remapping => "remapping",
            MigrationState::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provisioned" => Some(MigrationState::Provisioned),
            "remapping" => Some(MigrationState::Remapping),
            "completed" => Some(MigrationState::Completed),
            _ => None,
        }
    }
}

/// Journal entry for a migration that has passed the provisioning step.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMigration {
    pub legacy_id: String,
    pub new_id: String,
    pub email: String,
    pub state: MigrationState,
    /// The provider withheld a session at sign-up; remap waits for email confirmation.
    pub confirmation_pending: bool,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Step of the migration sequence that failed after provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Journal,
    Remap,
    Retire,
    Receipt,
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStep::Journal => "journal",
            MigrationStep::Remap => "remap",
            MigrationStep::Retire => "retire",
            MigrationStep::Receipt => "receipt",
        };
        f.write_str(s)
    }
}

/// What a `migrate` call achieved.
#[derive(Debug, Clone)]
pub enum MigrationOutcome {
    /// References remapped, legacy record retired, receipt written.
    Completed {
        receipt: MigrationReceipt,
        /// Present when the provider issued a session at sign-up.
        session: Option<Session>,
    },
    /// Managed identity provisioned; remap waits for email confirmation and
    /// is completed by the reconciliation job.
    Deferred { legacy_id: String, new_id: String },
}

impl MigrationOutcome {
    pub fn receipt(&self) -> Option<&MigrationReceipt> {
        match self {
            MigrationOutcome::Completed { receipt, .. } => Some(receipt),
            MigrationOutcome::Deferred { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_column_text() {
        for state in [
            MigrationState::Provisioned,
            MigrationState::Remapping,
            MigrationState::Completed,
        ] {
            assert_eq!(MigrationState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MigrationState::parse("bogus"), None);
    }
}
