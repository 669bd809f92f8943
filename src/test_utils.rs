//! Test utilities for spendcap.
//!
//! Shared data factories, an in-memory snapshot store, and assertion macros
//! for use across all test modules. Compiled only for tests or with the
//! `test-utils` feature.

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::core::config::WeekStartDay;
use crate::core::provider::Provider;
use crate::core::week;
use crate::error::{Result, SpendcapError};
use crate::storage::{Snapshot, SnapshotStore};

// =============================================================================
// Test Data Factories
// =============================================================================

/// Create a test `Snapshot` at the given instant with derived calendar fields.
///
/// The billing week is anchored to the Monday preceding `taken_at`;
/// `local_daily`, `inferred_budget`, and `reset_hint` start empty and can be
/// filled via struct update syntax.
#[must_use]
pub fn make_test_snapshot(
    provider: Provider,
    taken_at: DateTime<Utc>,
    local_tokens: i64,
    scraped_used_percent: Option<f64>,
) -> Snapshot {
    Snapshot {
        id: 0,
        provider,
        taken_at,
        week_start: Some(week::week_start(taken_at, WeekStartDay::Monday)),
        local_tokens,
        local_daily: 0,
        scraped_used_percent,
        inferred_budget: None,
        reset_hint: None,
        day_of_week: taken_at.weekday().num_days_from_monday(),
        hour_of_day: taken_at.hour(),
        week_number: taken_at.iso_week().week(),
        year: taken_at.year(),
    }
}

// =============================================================================
// In-Memory Snapshot Store
// =============================================================================

/// Vec-backed [`SnapshotStore`] for tests that do not need SQLite.
pub struct MemoryStore {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl MemoryStore {
    /// Create a store seeded with the given snapshots.
    #[must_use]
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots),
        }
    }

    /// Append a snapshot after construction.
    pub fn push(&self, snapshot: Snapshot) {
        if let Ok(mut guard) = self.snapshots.lock() {
            guard.push(snapshot);
        }
    }

    fn read(&self) -> Result<Vec<Snapshot>> {
        self.snapshots
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| SpendcapError::Other(anyhow::anyhow!("memory store lock poisoned")))
    }
}

impl SnapshotStore for MemoryStore {
    fn snapshots_in_range(
        &self,
        provider: Provider,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        let mut matching: Vec<Snapshot> = self
            .read()?
            .into_iter()
            .filter(|s| s.provider == provider && s.taken_at >= from && s.taken_at <= to)
            .collect();
        matching.sort_by_key(|s| s.taken_at);
        Ok(matching)
    }

    fn latest_with_budget(&self, provider: Provider) -> Result<Option<Snapshot>> {
        Ok(self
            .read()?
            .into_iter()
            .filter(|s| s.provider == provider && s.inferred_budget.is_some_and(|b| b > 0))
            .max_by_key(|s| s.taken_at))
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert two floats are equal within a small epsilon.
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = f64::EPSILON * 100.0;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    };
    ($left:expr, $right:expr, $epsilon:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = $epsilon;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    };
}
