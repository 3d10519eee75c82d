//! Embedded schema migrations.

use anyhow::anyhow;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection::connect_sqlite;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run_sqlite`] to bring the state database up to date. A single
/// active runner per database file is assumed; migrations are not safe to run concurrently
/// from two processes against the same path.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on the SQLite database at `database_url`, creating it if
/// it does not already exist, and applies the standard connection PRAGMAs.
pub fn run_sqlite(database_url: &str) -> anyhow::Result<()> {
    let mut conn = connect_sqlite(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}
