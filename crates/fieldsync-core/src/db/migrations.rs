//! Database migrations

use crate::error::Result;
use crate::models::EntityKind;
use rusqlite::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: one record table per entity kind
fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )?;

    for kind in EntityKind::PUSH_ORDER {
        let table = kind.table();
        // record_date is ISO-8601 so month ranges compare lexicographically
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                employee_id TEXT NOT NULL,
                record_date TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_employee_date
                ON {table}(employee_id, record_date);"
        ))?;
    }

    tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    tx.commit()?;
    tracing::debug!("Applied schema migration v1");
    Ok(())
}

/// Migration to version 2: per-employee sync bookkeeping
fn migrate_v2(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            employee_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (employee_id, key)
        );",
    )?;

    tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    tx.commit()?;
    tracing::debug!("Applied schema migration v2");
    Ok(())
}
