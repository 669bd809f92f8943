//! Budget exhaustion projection.
//!
//! Given a calibrated weekly budget and the rolling snapshot history,
//! estimates the remaining tokens, the exhaustion instant, and whether
//! exhaustion lands before the next weekly reset. Reset times arrive in
//! several encodings (free-text hints with timezone abbreviations, or a
//! stored week start) and must all resolve to a single UTC instant.
//!
//! A `None` projection is not an error: it means "not enough data yet",
//! the expected steady state for a new installation.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::calibration::BudgetOrigin;
use crate::core::config::BudgetSettings;
use crate::core::provider::Provider;
use crate::core::source::BudgetSource;
use crate::core::week;
use crate::error::Result;
use crate::storage::{Snapshot, SnapshotStore};

/// A single billing week cannot establish a trend from one day of data.
const MIN_WEEK_WINDOW_DAYS: usize = 2;

/// How far before the snapshot an anchored hint date may fall before it is
/// treated as belonging to the next year (December snapshot, January reset).
const YEAR_WRAP_SLACK_DAYS: i64 = 31;

// =============================================================================
// Projection Types
// =============================================================================

/// Forward estimate of budget exhaustion for one provider.
///
/// Regenerated on every stats refresh; consumers treat it as a read-only
/// value object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetProjection {
    pub provider: Provider,
    /// Weekly budget the projection is based on.
    pub weekly_budget: i64,
    /// Current usage percentage, clamped to `[0, 100]`.
    pub current_used_pct: f64,
    /// Average tokens consumed per day (per-day maxima averaged).
    pub avg_daily_usage: f64,
    /// `avg_daily_usage / 24`, for display.
    pub avg_hourly_usage: f64,
    /// Tokens left in the current cycle. Never negative.
    pub remaining_tokens: i64,
    /// Whole days until exhaustion at the current rate.
    pub est_days_remaining: Option<i64>,
    /// Fractional hours until exhaustion at the current rate.
    pub est_hours_remaining: Option<f64>,
    /// Predicted exhaustion instant.
    pub est_exhaust_at: Option<DateTime<Utc>>,
    /// Next weekly reset, when it could be resolved.
    pub reset_at: Option<DateTime<Utc>>,
    /// Seconds until the reset, when resolved.
    pub time_until_reset_secs: Option<i64>,
    /// Raw reset hint, verbatim, for display when parsing failed.
    pub reset_hint: Option<String>,
    /// Whether the budget runs out before the reset arrives.
    pub will_exhaust_before_reset: bool,
    /// Provenance of the weekly budget.
    pub source: BudgetOrigin,
}

/// Projections for every tracked provider.
///
/// `primary` mirrors the first computed projection for callers that only
/// track one subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionReport {
    pub primary: Option<BudgetProjection>,
    pub projections: Vec<BudgetProjection>,
}

// =============================================================================
// Projection Engine
// =============================================================================

/// Computes exhaustion projections from snapshot history.
pub struct ProjectionEngine {
    settings: BudgetSettings,
    store: Arc<dyn SnapshotStore>,
    budget_source: Option<Arc<dyn BudgetSource>>,
}

impl ProjectionEngine {
    /// Create an engine over a snapshot store.
    #[must_use]
    pub fn new(settings: BudgetSettings, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            settings,
            store,
            budget_source: None,
        }
    }

    /// Attach a live budget source; its positive estimates take precedence
    /// over the budget stored in the snapshot.
    #[must_use]
    pub fn with_budget_source(mut self, source: Arc<dyn BudgetSource>) -> Self {
        self.budget_source = Some(source);
        self
    }

    /// Project budget exhaustion for a provider.
    ///
    /// Returns `Ok(None)` when no calibrated snapshot exists or no positive
    /// daily-usage average can be established.
    ///
    /// # Errors
    /// Returns an error only when a snapshot store or budget source query
    /// fails.
    pub fn compute_projection(
        &self,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<Option<BudgetProjection>> {
        let Some(snapshot) = self.store.latest_with_budget(provider)? else {
            tracing::debug!(provider = provider.cli_name(), "no calibrated snapshot yet");
            return Ok(None);
        };

        let (weekly_budget, source) = self.resolve_budget(provider, &snapshot)?;

        let Some(avg_daily_usage) = self.average_daily_usage(provider, now)? else {
            tracing::debug!(
                provider = provider.cli_name(),
                "no positive daily usage to average"
            );
            return Ok(None);
        };

        #[allow(clippy::cast_precision_loss)] // budgets are far below 2^52
        let budget = weekly_budget as f64;
        #[allow(clippy::cast_precision_loss)]
        let local_tokens = snapshot.local_tokens as f64;
        let current_used_pct = snapshot
            .scraped_used_percent
            .unwrap_or(local_tokens / budget * 100.0)
            .clamp(0.0, 100.0);

        #[allow(clippy::cast_possible_truncation)] // token amounts are far below 2^52
        let remaining_tokens = ((budget * (1.0 - current_used_pct / 100.0)).round() as i64).max(0);

        let (est_days_remaining, est_hours_remaining, est_exhaust_at) =
            if avg_daily_usage > 0.0 && remaining_tokens > 0 {
                #[allow(clippy::cast_precision_loss)]
                let remaining = remaining_tokens as f64;
                let days = remaining / avg_daily_usage;
                let hours = days * 24.0;
                #[allow(clippy::cast_possible_truncation)]
                let exhaust_at = now + Duration::seconds((hours * 3600.0) as i64);
                #[allow(clippy::cast_possible_truncation)]
                let whole_days = days.floor() as i64;
                (Some(whole_days), Some(hours), Some(exhaust_at))
            } else {
                (None, None, None)
            };

        let reset_at = resolve_reset(&snapshot, now);
        let time_until_reset_secs = reset_at.map(|reset| (reset - now).num_seconds());
        let will_exhaust_before_reset = match (est_exhaust_at, reset_at) {
            (Some(exhaust), Some(reset)) => exhaust < reset,
            _ => false,
        };

        Ok(Some(BudgetProjection {
            provider,
            weekly_budget,
            current_used_pct,
            avg_daily_usage,
            avg_hourly_usage: avg_daily_usage / 24.0,
            remaining_tokens,
            est_days_remaining,
            est_hours_remaining,
            est_exhaust_at,
            reset_at,
            time_until_reset_secs,
            reset_hint: snapshot.reset_hint,
            will_exhaust_before_reset,
            source,
        }))
    }

    /// Project every provider independently; the first computed projection
    /// doubles as the primary.
    ///
    /// A per-provider failure is logged and skipped rather than failing the
    /// whole report.
    ///
    /// # Errors
    /// Infallible today; kept fallible for parity with the per-provider call.
    pub fn compute_all(
        &self,
        providers: &[Provider],
        now: DateTime<Utc>,
    ) -> Result<ProjectionReport> {
        let mut report = ProjectionReport::default();

        for &provider in providers {
            match self.compute_projection(provider, now) {
                Ok(Some(projection)) => {
                    if report.primary.is_none() {
                        report.primary = Some(projection.clone());
                    }
                    report.projections.push(projection);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        provider = provider.cli_name(),
                        error = %e,
                        "skipping projection for provider"
                    );
                }
            }
        }

        Ok(report)
    }

    fn resolve_budget(
        &self,
        provider: Provider,
        snapshot: &Snapshot,
    ) -> Result<(i64, BudgetOrigin)> {
        if let Some(source) = &self.budget_source {
            let estimate = source.budget_estimate(provider)?;
            if estimate.weekly_tokens > 0 {
                return Ok((estimate.weekly_tokens, estimate.source));
            }
        }
        // latest_with_budget guarantees a positive inferred budget.
        let stored = snapshot.inferred_budget.unwrap_or_default();
        Ok((stored, BudgetOrigin::Calibrated))
    }

    /// Average daily consumption: per calendar day, take the maximum
    /// `local_daily` observed, then average across days.
    ///
    /// The current billing week is preferred when it holds at least two days
    /// of data; otherwise a rolling 7-day window is used.
    fn average_daily_usage(&self, provider: Provider, now: DateTime<Utc>) -> Result<Option<f64>> {
        let cycle_start = week::week_start(now, self.settings.week_start_day);
        let week_scoped = self.store.snapshots_in_range(provider, cycle_start, now)?;

        if let Some(avg) = per_day_max_average(&week_scoped, MIN_WEEK_WINDOW_DAYS) {
            return Ok(Some(avg));
        }

        let rolling = self
            .store
            .snapshots_in_range(provider, now - Duration::days(7), now)?;
        Ok(per_day_max_average(&rolling, 1))
    }
}

/// Per-day-max-then-average over a snapshot window. `None` unless at least
/// `min_days` days contribute and the average is positive.
fn per_day_max_average(snapshots: &[Snapshot], min_days: usize) -> Option<f64> {
    let mut day_max: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for snapshot in snapshots {
        if snapshot.local_daily <= 0 {
            continue;
        }
        let entry = day_max.entry(snapshot.taken_at.date_naive()).or_insert(0);
        *entry = (*entry).max(snapshot.local_daily);
    }

    if day_max.len() < min_days {
        return None;
    }

    #[allow(clippy::cast_precision_loss)] // per-day totals are small
    let avg = day_max.values().sum::<i64>() as f64 / day_max.len() as f64;
    (avg > 0.0).then_some(avg)
}

// =============================================================================
// Reset-Time Resolution
// =============================================================================

/// Resolve the next weekly reset: a parsed free-text hint wins, then the
/// stored week start plus seven days, else nothing.
fn resolve_reset(snapshot: &Snapshot, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(hint) = &snapshot.reset_hint
        && let Some(parsed) = parse_reset_hint(hint, snapshot.taken_at)
    {
        return Some(week::advance_weekly_past(parsed, now));
    }

    snapshot
        .week_start
        .map(|start| week::advance_weekly_past(start + Duration::days(7), now))
}

static HINT_TZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([A-Za-z]{2,5})\)\s*$").unwrap());

static HINT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:resets?\s+(?:at\s+|on\s+)?)?([a-z]{3,9})\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?)?",
    )
    .unwrap()
});

/// Parse a free-text reset hint such as `"Jan 2 at 3:04pm (PST)"`.
///
/// The month/day are anchored to the snapshot's year, rolling forward a year
/// when the anchored date would land more than a month before the snapshot
/// (a December snapshot hinting at a January reset).
fn parse_reset_hint(hint: &str, snapshot_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let offset_hours = HINT_TZ
        .captures(hint)
        .and_then(|caps| tz_offset_hours(&caps[1]))
        .unwrap_or(0);
    let text = HINT_TZ.replace(hint, "");

    let caps = HINT_DATE.captures(text.trim())?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let mut hour: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let minute: u32 = caps.get(4).map_or(Some(0), |m| m.as_str().parse().ok())?;
    match caps.get(5).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(meridiem) if meridiem == "pm" && hour < 12 => hour += 12,
        Some(meridiem) if meridiem == "am" && hour == 12 => hour = 0,
        _ => {}
    }

    let offset = FixedOffset::east_opt(offset_hours * 3600)?;
    let anchored = offset
        .with_ymd_and_hms(snapshot_time.year(), month, day, hour, minute, 0)
        .single()?
        .with_timezone(&Utc);

    // A hint date far behind the snapshot belongs to the next calendar year.
    if anchored < snapshot_time - Duration::days(YEAR_WRAP_SLACK_DAYS) {
        return offset
            .with_ymd_and_hms(snapshot_time.year() + 1, month, day, hour, minute, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc));
    }

    Some(anchored)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    match prefix.as_str() {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

/// Fixed offsets for the timezone abbreviations providers actually emit.
/// DST is baked into the abbreviation itself (PST vs PDT), so no zone
/// database is needed.
fn tz_offset_hours(abbr: &str) -> Option<i32> {
    match abbr.to_ascii_uppercase().as_str() {
        "PST" => Some(-8),
        "PDT" | "MST" => Some(-7),
        "MDT" | "CST" => Some(-6),
        "CDT" | "EST" => Some(-5),
        "EDT" => Some(-4),
        "UTC" | "GMT" => Some(0),
        "BST" | "CET" => Some(1),
        "CEST" => Some(2),
        "JST" => Some(9),
        "AEST" => Some(10),
        "AEDT" => Some(11),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::core::calibration::{BudgetEstimate, Confidence};
    use crate::test_utils::{MemoryStore, make_test_snapshot};

    fn utc(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
    }

    // Wednesday 2025-06-11; billing week starts Monday 2025-06-09.
    fn now() -> DateTime<Utc> {
        utc(11, 12)
    }

    fn calibrated_snap(day: u32, hour: u32, local_daily: i64, budget: i64) -> Snapshot {
        Snapshot {
            local_daily,
            inferred_budget: Some(budget),
            ..make_test_snapshot(Provider::Claude, utc(day, hour), 0, None)
        }
    }

    fn engine(snapshots: Vec<Snapshot>) -> ProjectionEngine {
        ProjectionEngine::new(
            BudgetSettings::default(),
            Arc::new(MemoryStore::new(snapshots)),
        )
    }

    struct FixedBudget(i64);

    impl BudgetSource for FixedBudget {
        fn budget_estimate(&self, _provider: Provider) -> Result<BudgetEstimate> {
            Ok(BudgetEstimate {
                weekly_tokens: self.0,
                source: BudgetOrigin::Calibrated,
                confidence: Confidence::High,
                sample_count: 6,
                variance: 0.0,
            })
        }
    }

    #[test]
    fn no_calibrated_snapshot_yields_none() {
        let projection = engine(vec![make_test_snapshot(
            Provider::Claude,
            utc(10, 9),
            100,
            None,
        )])
        .compute_projection(Provider::Claude, now())
        .unwrap();
        assert!(projection.is_none());
    }

    #[test]
    fn no_positive_daily_usage_yields_none() {
        let projection = engine(vec![calibrated_snap(10, 9, 0, 500_000)])
            .compute_projection(Provider::Claude, now())
            .unwrap();
        assert!(projection.is_none());
    }

    #[test]
    fn projects_exhaustion_from_week_scoped_average() {
        // Two days in this week: maxima 40k and 60k, average 50k/day.
        let snapshots = vec![
            calibrated_snap(9, 9, 20_000, 700_000),
            calibrated_snap(9, 18, 40_000, 700_000),
            Snapshot {
                scraped_used_percent: Some(50.0),
                ..calibrated_snap(10, 18, 60_000, 700_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        crate::assert_float_eq!(projection.avg_daily_usage, 50_000.0);
        crate::assert_float_eq!(projection.current_used_pct, 50.0);
        assert_eq!(projection.remaining_tokens, 350_000);
        // 350k remaining at 50k/day: 7 days.
        assert_eq!(projection.est_days_remaining, Some(7));
        crate::assert_float_eq!(projection.est_hours_remaining.unwrap(), 168.0);
        assert_eq!(projection.est_exhaust_at, Some(now() + Duration::days(7)));
        // Reset lands Monday 2025-06-16, well before exhaustion.
        assert_eq!(projection.reset_at, Some(utc(16, 0)));
        assert!(!projection.will_exhaust_before_reset);
    }

    #[test]
    fn single_week_day_falls_back_to_rolling_window() {
        // Only one day inside the billing week (Tue 2025-06-10), but the
        // preceding Saturday is within the rolling 7-day window.
        let snapshots = vec![
            calibrated_snap(7, 18, 30_000, 700_000),
            calibrated_snap(10, 18, 50_000, 700_000),
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        crate::assert_float_eq!(projection.avg_daily_usage, 40_000.0);
    }

    #[test]
    fn exhaustion_before_reset_is_flagged() {
        // 10% left of 700k at 50k/day exhausts in ~1.4 days; reset is ~4.5
        // days away.
        let snapshots = vec![
            calibrated_snap(9, 18, 50_000, 700_000),
            Snapshot {
                scraped_used_percent: Some(90.0),
                ..calibrated_snap(10, 18, 50_000, 700_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        assert_eq!(projection.remaining_tokens, 70_000);
        assert_eq!(projection.est_days_remaining, Some(1));
        assert!(projection.will_exhaust_before_reset);
    }

    #[test]
    fn live_budget_source_overrides_stored_budget() {
        let snapshots = vec![
            calibrated_snap(9, 18, 50_000, 700_000),
            calibrated_snap(10, 18, 50_000, 700_000),
        ];
        let projection = engine(snapshots)
            .with_budget_source(Arc::new(FixedBudget(1_000_000)))
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        assert_eq!(projection.weekly_budget, 1_000_000);
    }

    #[test]
    fn used_pct_from_local_tokens_is_clamped() {
        let snapshots = vec![
            calibrated_snap(9, 18, 50_000, 100_000),
            Snapshot {
                local_tokens: 150_000,
                ..calibrated_snap(10, 18, 50_000, 100_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        crate::assert_float_eq!(projection.current_used_pct, 100.0);
        assert_eq!(projection.remaining_tokens, 0);
        assert_eq!(projection.est_exhaust_at, None);
        assert!(!projection.will_exhaust_before_reset);
    }

    #[test]
    fn week_start_reset_advances_past_now() {
        // Snapshot from a week long past; week_start + 7d must keep advancing
        // until it exceeds now.
        let stale_week_start = Utc.with_ymd_and_hms(2025, 5, 12, 0, 0, 0).unwrap();
        let snapshots = vec![
            Snapshot {
                week_start: Some(stale_week_start),
                ..calibrated_snap(9, 18, 50_000, 700_000)
            },
            Snapshot {
                week_start: Some(stale_week_start),
                ..calibrated_snap(10, 18, 50_000, 700_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        // 2025-05-12 + 7d increments first exceeds Wed 2025-06-11 at Mon
        // 2025-06-16.
        assert_eq!(projection.reset_at, Some(utc(16, 0)));
        assert_eq!(
            projection.time_until_reset_secs,
            Some((utc(16, 0) - now()).num_seconds())
        );
    }

    #[test]
    fn unresolvable_reset_exposes_raw_hint() {
        let snapshots = vec![
            Snapshot {
                week_start: None,
                ..calibrated_snap(9, 18, 50_000, 700_000)
            },
            Snapshot {
                week_start: None,
                reset_hint: Some("whenever the stars align".to_string()),
                ..calibrated_snap(10, 18, 50_000, 700_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        assert_eq!(projection.reset_at, None);
        assert_eq!(projection.time_until_reset_secs, None);
        assert_eq!(
            projection.reset_hint.as_deref(),
            Some("whenever the stars align")
        );
    }

    #[test]
    fn parses_hint_with_timezone_abbreviation() {
        // 3:04pm PST = 23:04 UTC.
        let parsed = parse_reset_hint("Jun 13 at 3:04pm (PST)", utc(11, 12)).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 6, 13, 23, 4, 0).unwrap());
    }

    #[test]
    fn parses_hint_variants() {
        let snap_time = utc(11, 12);

        let parsed = parse_reset_hint("resets Jun 16", snap_time).unwrap();
        assert_eq!(parsed, utc(16, 0));

        let parsed = parse_reset_hint("Resets on June 16 at 9am", snap_time).unwrap();
        assert_eq!(parsed, utc(16, 9));

        let parsed = parse_reset_hint("Jun 16, 12am (UTC)", snap_time).unwrap();
        assert_eq!(parsed, utc(16, 0));

        assert!(parse_reset_hint("no date here", snap_time).is_none());
    }

    #[test]
    fn hint_year_wraps_for_december_snapshot() {
        // Snapshot in late December hinting at a January reset: the anchored
        // date falls ~11 months before the snapshot and rolls into 2026.
        let snap_time = Utc.with_ymd_and_hms(2025, 12, 29, 12, 0, 0).unwrap();
        let parsed = parse_reset_hint("Jan 2 at 3:00pm (UTC)", snap_time).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 2, 15, 0, 0).unwrap());
    }

    #[test]
    fn hint_reset_advances_weekly_past_now() {
        // Hint resolves to Monday 2025-06-02, already past; advances to the
        // first Monday after now.
        let snapshots = vec![
            calibrated_snap(9, 18, 50_000, 700_000),
            Snapshot {
                reset_hint: Some("resets Jun 2 at 12am (UTC)".to_string()),
                ..calibrated_snap(10, 18, 50_000, 700_000)
            },
        ];
        let projection = engine(snapshots)
            .compute_projection(Provider::Claude, now())
            .unwrap()
            .unwrap();

        assert_eq!(projection.reset_at, Some(utc(16, 0)));
    }

    #[test]
    fn compute_all_exposes_first_projection_as_primary() {
        let store = MemoryStore::new(vec![
            calibrated_snap(9, 18, 50_000, 700_000),
            calibrated_snap(10, 18, 50_000, 700_000),
            Snapshot {
                provider: Provider::Codex,
                ..calibrated_snap(9, 18, 10_000, 300_000)
            },
            Snapshot {
                provider: Provider::Codex,
                ..calibrated_snap(10, 18, 10_000, 300_000)
            },
        ]);
        let engine = ProjectionEngine::new(BudgetSettings::default(), Arc::new(store));

        let report = engine
            .compute_all(&[Provider::Claude, Provider::Codex, Provider::Gemini], now())
            .unwrap();

        assert_eq!(report.projections.len(), 2);
        let primary = report.primary.unwrap();
        assert_eq!(primary.provider, Provider::Claude);
        assert_eq!(report.projections[1].provider, Provider::Codex);
        assert_eq!(report.projections[1].weekly_budget, 300_000);
    }
}
