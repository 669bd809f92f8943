//! SQLite-backed snapshot store.
//!
//! One row per usage observation, appended periodically by the collector and
//! queried read-only by the Calibrator and Projection Engine. Malformed rows
//! are skipped with a warning rather than failing the whole query: a single
//! corrupt sample must never block budget enforcement.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::core::provider::Provider;
use crate::error::{Result, SpendcapError};
use crate::storage::schema::{DEFAULT_RETENTION_DAYS, cleanup_old_snapshots, run_migrations};

// =============================================================================
// Snapshot Model
// =============================================================================

/// One persisted usage observation.
///
/// Read-only to the admission-control core; retention and pruning are the
/// collector's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Row id.
    pub id: i64,
    /// Provider the observation belongs to.
    pub provider: Provider,
    /// When the observation was taken.
    pub taken_at: DateTime<Utc>,
    /// Start of the billing week the observation falls in, when the
    /// collector knows it.
    pub week_start: Option<DateTime<Utc>>,
    /// Locally counted tokens consumed so far this week.
    pub local_tokens: i64,
    /// Locally counted tokens consumed so far today.
    pub local_daily: i64,
    /// Usage percentage as reported by the provider, if available.
    pub scraped_used_percent: Option<f64>,
    /// Weekly budget inferred at collection time, if any.
    pub inferred_budget: Option<i64>,
    /// Free-text reset hint captured from the provider, verbatim.
    pub reset_hint: Option<String>,
    /// Day of week (0 = Monday).
    pub day_of_week: u32,
    /// Hour of day (0-23).
    pub hour_of_day: u32,
    /// ISO week number.
    pub week_number: u32,
    /// Calendar year.
    pub year: i32,
}

/// A snapshot about to be recorded; calendar fields are derived on insert.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub provider: Provider,
    pub taken_at: DateTime<Utc>,
    pub week_start: Option<DateTime<Utc>>,
    pub local_tokens: i64,
    pub local_daily: i64,
    pub scraped_used_percent: Option<f64>,
    pub inferred_budget: Option<i64>,
    pub reset_hint: Option<String>,
}

// =============================================================================
// Store Contract
// =============================================================================

/// Read contract consumed by the Calibrator and Projection Engine.
///
/// Concurrency discipline (locking, transactions) is the store's own
/// responsibility; callers only read.
pub trait SnapshotStore: Send + Sync {
    /// Snapshots for a provider within `[from, to]`, ordered by timestamp
    /// ascending.
    fn snapshots_in_range(
        &self,
        provider: Provider,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>>;

    /// The most recent snapshot for a provider carrying a positive inferred
    /// budget.
    fn latest_with_budget(&self, provider: Provider) -> Result<Option<Snapshot>>;
}

// =============================================================================
// SQLite Store
// =============================================================================

/// Snapshot database access layer.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Create or open a snapshot database at the given path.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or schema migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("open snapshot db: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory snapshot database (for testing).
    ///
    /// # Errors
    /// Returns an error if the in-memory database cannot be opened or
    /// migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("open in-memory db: {e}")))?;

        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a snapshot, deriving the calendar fields from its timestamp.
    ///
    /// # Errors
    /// Returns an error if the INSERT statement cannot be prepared or
    /// executed.
    pub fn record_snapshot(&self, snapshot: &NewSnapshot) -> Result<i64> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO usage_snapshots ( \
                    provider, taken_at, week_start, \
                    local_tokens, local_daily, scraped_used_percent, \
                    inferred_budget, reset_hint, \
                    day_of_week, hour_of_day, week_number, year \
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("prepare insert: {e}")))?;

        stmt.execute(params![
            snapshot.provider.cli_name(),
            snapshot.taken_at.to_rfc3339(),
            snapshot.week_start.map(|ws| ws.to_rfc3339()),
            snapshot.local_tokens,
            snapshot.local_daily,
            snapshot.scraped_used_percent,
            snapshot.inferred_budget,
            snapshot.reset_hint,
            snapshot.taken_at.weekday().num_days_from_monday(),
            snapshot.taken_at.hour(),
            snapshot.taken_at.iso_week().week(),
            snapshot.taken_at.year(),
        ])
        .map_err(|e| SpendcapError::Other(anyhow::anyhow!("insert snapshot: {e}")))?;

        drop(stmt);
        Ok(conn.last_insert_rowid())
    }

    /// Delete snapshots older than the retention window.
    ///
    /// # Errors
    /// Returns an error if the retention days are non-positive or the cleanup
    /// query fails.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let conn = self.lock()?;
        cleanup_old_snapshots(&conn, retention_days)
    }

    /// Delete snapshots using the default retention window.
    ///
    /// # Errors
    /// Returns an error if the cleanup query fails.
    pub fn cleanup_default(&self) -> Result<usize> {
        self.cleanup(DEFAULT_RETENTION_DAYS)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SpendcapError::Other(anyhow::anyhow!("snapshot store lock poisoned")))
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn snapshots_in_range(
        &self,
        provider: Provider,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        if from > to {
            return Err(SpendcapError::Config(
                "Time range start must be before end".to_string(),
            ));
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT \
                    id, provider, taken_at, week_start, \
                    local_tokens, local_daily, scraped_used_percent, \
                    inferred_budget, reset_hint, \
                    day_of_week, hour_of_day, week_number, year \
                FROM usage_snapshots \
                WHERE provider = ?1 AND taken_at BETWEEN ?2 AND ?3 \
                ORDER BY taken_at ASC",
            )
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("prepare select: {e}")))?;

        let rows = stmt
            .query_map(
                params![provider.cli_name(), from.to_rfc3339(), to.to_rfc3339()],
                map_raw_row,
            )
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("query snapshots: {e}")))?;

        let mut snapshots = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| SpendcapError::Other(anyhow::anyhow!("map row: {e}")))?;
            match parse_raw_row(raw) {
                Some(snapshot) => snapshots.push(snapshot),
                None => tracing::warn!(provider = provider.cli_name(), "skipping malformed snapshot row"),
            }
        }

        Ok(snapshots)
    }

    fn latest_with_budget(&self, provider: Provider) -> Result<Option<Snapshot>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT \
                    id, provider, taken_at, week_start, \
                    local_tokens, local_daily, scraped_used_percent, \
                    inferred_budget, reset_hint, \
                    day_of_week, hour_of_day, week_number, year \
                FROM usage_snapshots \
                WHERE provider = ?1 AND inferred_budget > 0 \
                ORDER BY taken_at DESC",
            )
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("prepare select: {e}")))?;

        let rows = stmt
            .query_map(params![provider.cli_name()], map_raw_row)
            .map_err(|e| SpendcapError::Other(anyhow::anyhow!("query latest: {e}")))?;

        for row in rows {
            let raw = row.map_err(|e| SpendcapError::Other(anyhow::anyhow!("map row: {e}")))?;
            if let Some(snapshot) = parse_raw_row(raw) {
                return Ok(Some(snapshot));
            }
            tracing::warn!(provider = provider.cli_name(), "skipping malformed snapshot row");
        }

        Ok(None)
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

type RawRow = (
    i64,
    String,
    String,
    Option<String>,
    i64,
    i64,
    Option<f64>,
    Option<i64>,
    Option<String>,
    u32,
    u32,
    u32,
    i32,
);

fn map_raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn parse_raw_row(raw: RawRow) -> Option<Snapshot> {
    let (
        id,
        provider,
        taken_at,
        week_start,
        local_tokens,
        local_daily,
        scraped_used_percent,
        inferred_budget,
        reset_hint,
        day_of_week,
        hour_of_day,
        week_number,
        year,
    ) = raw;

    let provider = Provider::from_cli_name(&provider).ok()?;
    let taken_at = DateTime::parse_from_rfc3339(&taken_at)
        .ok()?
        .with_timezone(&Utc);
    let week_start = match week_start {
        Some(raw) => Some(DateTime::parse_from_rfc3339(&raw).ok()?.with_timezone(&Utc)),
        None => None,
    };

    Some(Snapshot {
        id,
        provider,
        taken_at,
        week_start,
        local_tokens,
        local_daily,
        scraped_used_percent,
        inferred_budget,
        reset_hint,
        day_of_week,
        hour_of_day,
        week_number,
        year,
    })
}

// =============================================================================
// Tests
// =============================================================================
