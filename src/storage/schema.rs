//! Snapshot database schema and migrations.
//!
//! Versioned migrations in a `schema_migrations` table; each migration runs
//! inside a transaction and is recorded on commit.

use chrono::{Duration, Utc};
use rusqlite::Connection;

use crate::error::{Result, SpendcapError};

const SNAPSHOT_MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "CREATE TABLE usage_snapshots (\
            id INTEGER PRIMARY KEY AUTOINCREMENT,\
            provider TEXT NOT NULL,\
            taken_at TEXT NOT NULL,\
            week_start TEXT,\
            local_tokens INTEGER NOT NULL DEFAULT 0,\
            local_daily INTEGER NOT NULL DEFAULT 0,\
            scraped_used_percent REAL,\
            inferred_budget INTEGER,\
            reset_hint TEXT,\
            day_of_week INTEGER NOT NULL,\
            hour_of_day INTEGER NOT NULL,\
            week_number INTEGER NOT NULL,\
            year INTEGER NOT NULL,\
            created_at TEXT DEFAULT (datetime('now'))\
        );\
        CREATE INDEX idx_snapshots_provider_time \
            ON usage_snapshots(provider, taken_at);",
}];

/// Default retention window for snapshots.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Run schema migrations for the snapshot database.
///
/// Returns the latest schema version applied.
///
/// # Errors
/// Returns an error if creating the migrations table, reading the schema
/// version, or applying any migration fails.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    ensure_schema_migrations_table(conn)?;

    let mut current_version = get_schema_version(conn)?;

    for migration in SNAPSHOT_MIGRATIONS {
        if migration.version > current_version {
            apply_migration(conn, migration)?;
            current_version = migration.version;
        }
    }

    Ok(current_version)
}

/// Delete snapshots older than the retention window.
///
/// Returns the number of rows deleted.
///
/// # Errors
/// Returns an error if `retention_days` is non-positive or the DELETE query
/// fails.
pub fn cleanup_old_snapshots(conn: &Connection, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Err(SpendcapError::Config(
            "Retention days must be greater than 0".to_string(),
        ));
    }

    let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();

    let deleted = conn
        .execute("DELETE FROM usage_snapshots WHERE taken_at < ?1", [cutoff])
        .map_err(|e| SpendcapError::Other(anyhow::anyhow!("cleanup failed: {e}")))?;

    Ok(deleted)
}

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: i32,
    sql: &'static str,
}

fn ensure_schema_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
            version INTEGER PRIMARY KEY,\
            applied_at TEXT DEFAULT (datetime('now'))\
        );",
    )
    .map_err(|e| SpendcapError::Other(anyhow::anyhow!("create schema_migrations: {e}")))?;

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .map_err(|e| SpendcapError::Other(anyhow::anyhow!("read schema version: {e}")))?;

    Ok(version.unwrap_or(0))
}

fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| SpendcapError::Other(anyhow::anyhow!("begin migration: {e}")))?;

    tx.execute_batch(migration.sql).map_err(|e| {
        SpendcapError::Other(anyhow::anyhow!("apply migration {}: {e}", migration.version))
    })?;

    tx.execute(
        "INSERT INTO schema_migrations (version) VALUES (?1)",
        [migration.version],
    )
    .map_err(|e| {
        SpendcapError::Other(anyhow::anyhow!(
            "record migration {}: {e}",
            migration.version
        ))
    })?;

    tx.commit().map_err(|e| {
        SpendcapError::Other(anyhow::anyhow!(
            "commit migration {}: {e}",
            migration.version
        ))
    })?;

    Ok(())
}
