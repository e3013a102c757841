// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Migration receipts are append-only and read back in the order they were
// written, so their ids are generated app-side as UUIDv7. Legacy account ids
// are whatever the legacy table holds; managed ids come from the provider.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
