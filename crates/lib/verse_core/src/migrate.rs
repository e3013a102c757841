//! Database migration support.
//!
//! Embeds and runs SQL migrations from `verse_core/migrations/`: the legacy
//! `users` table, the owner-keyed `articles` and `comments` tables, and the
//! identity migration journal.

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
