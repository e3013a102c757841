//! Migration advisory attached to responses for legacy callers.

use serde::Serialize;

use super::resolver::is_legacy;
use crate::models::auth::AuthOutcome;

/// Where legacy callers are sent to upgrade.
pub const MIGRATION_URL: &str = "/auth/migrate";

const MIGRATION_MESSAGE: &str =
    "Your account still uses the old sign-in system. Upgrade it to keep access to your work.";

/// Advisory body returned by the migration status endpoint and `/auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationAdvisory {
    pub migration_suggested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_url: Option<String>,
}

impl MigrationAdvisory {
    pub fn none() -> Self {
        Self {
            migration_suggested: false,
            message: None,
            migration_url: None,
        }
    }

    pub fn suggested() -> Self {
        Self {
            migration_suggested: true,
            message: Some(MIGRATION_MESSAGE.to_string()),
            migration_url: Some(MIGRATION_URL.to_string()),
        }
    }

    /// Advisory for a resolved caller; unauthenticated callers get none.
    pub fn for_outcome(outcome: Option<&AuthOutcome>) -> Self {
        match outcome {
            Some(outcome) if is_legacy(outcome) => Self::suggested(),
            _ => Self::none(),
        }
    }
}
