//! Schema migrations
//!
//! The numbered SQL files under `sql/` are embedded at compile time and
//! executed in filename order. Every statement uses IF NOT EXISTS so the
//! runner is idempotent and safe to call on every startup.

use rusqlite::Connection;

use super::StoreError;

const MIGRATIONS: &[(&str, &str)] = &[
    ("01_entities.sql", include_str!("../../sql/01_entities.sql")),
    ("02_metrics.sql", include_str!("../../sql/02_metrics.sql")),
    ("03_ingest.sql", include_str!("../../sql/03_ingest.sql")),
];

/// Apply all schema migrations and switch the database to WAL mode.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    // WAL keeps concurrent dashboard readers off the writer's back.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    log::info!("🔧 Running {} schema migrations", MIGRATIONS.len());
    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
        log::debug!("   applied {}", name);
    }

    Ok(())
}
