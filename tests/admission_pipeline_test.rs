//! End-to-end admission-control pipeline tests.
//!
//! Wires the SQLite snapshot store, Calibrator, trend predictor, Allowance
//! Manager, and Projection Engine together the way an embedding scheduler
//! would, and checks that one week of recorded history flows through every
//! stage.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use spendcap::core::{
    AllowanceManager, BudgetMode, BudgetOrigin, BudgetSettings, Calibrator, Confidence,
    FnUsageSource, HourlyTrendPredictor, ProjectionEngine, Provider, SourceRegistry, fixed_clock,
};
use spendcap::storage::{NewSnapshot, SnapshotStore, SqliteSnapshotStore};

// =============================================================================
// Test Helpers
// =============================================================================

fn utc(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
}

/// Wednesday 2025-06-11 noon; the billing week started Monday 2025-06-09.
fn now() -> DateTime<Utc> {
    utc(11, 12)
}

/// Record one week of Claude history: steady consumption against a 700k
/// subscription, every sample implying the same total budget.
fn seed_week(store: &SqliteSnapshotStore) {
    let samples = [
        // (taken_at, local_tokens, local_daily, scraped %, budget, hint)
        (utc(9, 9), 175_000, 10_000, 25.0, None, None),
        (utc(9, 18), 350_000, 30_000, 50.0, None, None),
        (
            utc(10, 18),
            525_000,
            40_000,
            75.0,
            Some(700_000),
            Some("resets Jun 16 at 12am (UTC)".to_string()),
        ),
    ];

    for (taken_at, local_tokens, local_daily, pct, inferred_budget, reset_hint) in samples {
        store
            .record_snapshot(&NewSnapshot {
                provider: Provider::Claude,
                taken_at,
                week_start: Some(utc(9, 0)),
                local_tokens,
                local_daily,
                scraped_used_percent: Some(pct),
                inferred_budget,
                reset_hint,
            })
            .expect("record snapshot");
    }
}

fn registry_with_percent(used: f64) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(
        Provider::Claude,
        Box::new(FnUsageSource::new(move |_| Ok(used))),
    );
    registry
}

// =============================================================================
// Pipeline Tests
// =============================================================================

#[test]
fn calibration_infers_budget_from_recorded_history() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    seed_week(&store);

    let calibrator = Calibrator::new(BudgetSettings::default(), store).with_clock(fixed_clock(now()));
    let result = calibrator.calibrate(Provider::Claude).unwrap();

    // Three samples, each implying exactly 700k.
    assert_eq!(result.inferred_budget, 700_000);
    assert_eq!(result.sample_count, 3);
    assert_eq!(result.confidence, Confidence::Medium);
    assert_eq!(result.source, BudgetOrigin::Calibrated);
}

#[test]
fn allowance_uses_the_calibrated_budget() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    seed_week(&store);

    let settings = BudgetSettings::default(); // weekly, max 75%, reserve 5%
    let calibrator =
        Calibrator::new(settings.clone(), store).with_clock(fixed_clock(now()));

    let manager = AllowanceManager::new(settings, registry_with_percent(50.0))
        .with_budget_source(Arc::new(calibrator))
        .with_clock(fixed_clock(now()));

    let result = manager.compute_allowance(Provider::Claude).unwrap();

    assert_eq!(result.weekly_budget, 700_000);
    assert_eq!(result.budget_source, BudgetOrigin::Calibrated);
    assert_eq!(result.budget_sample_count, 3);
    // 350k remaining over 5 days at 75%, minus a 17.5k reserve.
    assert_eq!(result.remaining_days, Some(5));
    assert_eq!(result.reserve_amount, 17_500);
    assert_eq!(result.allowance, 35_000);
}

#[test]
fn trend_prediction_carves_out_daytime_usage() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    seed_week(&store);

    let settings = BudgetSettings::default();
    let calibrator =
        Calibrator::new(settings.clone(), Arc::clone(&store) as Arc<dyn SnapshotStore>)
            .with_clock(fixed_clock(now()));
    let trend = HourlyTrendPredictor::new(store);

    let manager = AllowanceManager::new(settings, registry_with_percent(50.0))
        .with_budget_source(Arc::new(calibrator))
        .with_trend_predictor(Arc::new(trend))
        .with_clock(fixed_clock(now()));

    let result = manager.compute_allowance(Provider::Claude).unwrap();

    // Monday's 09:00 -> 18:00 delta of 20k lands in the hour-18 bucket,
    // which is still ahead of Wednesday noon.
    assert_eq!(result.predicted_usage, 20_000);
    assert_eq!(result.pre_prediction_allowance, 35_000);
    assert_eq!(result.allowance, 15_000);
}

#[test]
fn projection_reads_the_same_history() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    seed_week(&store);

    let settings = BudgetSettings::default();
    let calibrator =
        Calibrator::new(settings.clone(), Arc::clone(&store) as Arc<dyn SnapshotStore>)
            .with_clock(fixed_clock(now()));
    let engine = ProjectionEngine::new(settings, store).with_budget_source(Arc::new(calibrator));

    let projection = engine
        .compute_projection(Provider::Claude, now())
        .unwrap()
        .expect("projection available");

    assert_eq!(projection.weekly_budget, 700_000);
    // Day maxima 30k (Mon) and 40k (Tue) average to 35k/day.
    spendcap::assert_float_eq!(projection.avg_daily_usage, 35_000.0);
    spendcap::assert_float_eq!(projection.current_used_pct, 75.0);
    assert_eq!(projection.remaining_tokens, 175_000);
    // 175k at 35k/day: 5 days, landing just past the Monday reset.
    assert_eq!(projection.est_days_remaining, Some(5));
    assert_eq!(projection.est_exhaust_at, Some(now() + Duration::days(5)));
    // The hint "resets Jun 16 at 12am (UTC)" resolves to Monday midnight.
    assert_eq!(projection.reset_at, Some(utc(16, 0)));
    assert!(!projection.will_exhaust_before_reset);

    let report = engine
        .compute_all(&[Provider::Claude, Provider::Codex], now())
        .unwrap();
    assert_eq!(report.projections.len(), 1);
    assert_eq!(report.primary.unwrap().provider, Provider::Claude);
}

#[test]
fn disabled_calibration_keeps_the_configured_budget() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    seed_week(&store);

    let settings = BudgetSettings {
        calibrate_enabled: false,
        weekly_tokens: 300_000,
        ..Default::default()
    };
    let calibrator =
        Calibrator::new(settings.clone(), store).with_clock(fixed_clock(now()));

    let manager = AllowanceManager::new(settings, registry_with_percent(0.0))
        .with_budget_source(Arc::new(calibrator))
        .with_clock(fixed_clock(now()));

    let result = manager.compute_allowance(Provider::Claude).unwrap();
    assert_eq!(result.weekly_budget, 300_000);
    assert_eq!(result.budget_source, BudgetOrigin::Config);
    assert_eq!(result.budget_confidence, Confidence::None);
}

#[test]
fn unknown_provider_fails_closed() {
    let store = Arc::new(SqliteSnapshotStore::open_in_memory().unwrap());
    let calibrator = Calibrator::new(BudgetSettings::default(), store);

    let manager = AllowanceManager::new(BudgetSettings::default(), registry_with_percent(0.0))
        .with_budget_source(Arc::new(calibrator))
        .with_clock(fixed_clock(now()));

    // Codex has no registered usage source.
    assert!(manager.compute_allowance(Provider::Codex).is_err());
}

#[test]
fn pipeline_works_against_an_on_disk_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshots.db");

    {
        let store = SqliteSnapshotStore::open(&path).unwrap();
        seed_week(&store);
    }

    // Reopen; history must survive the round trip.
    let store = Arc::new(SqliteSnapshotStore::open(&path).unwrap());
    let settings = BudgetSettings {
        mode: BudgetMode::Daily,
        max_percent: 10,
        reserve_percent: 5,
        ..Default::default()
    };
    let calibrator =
        Calibrator::new(settings.clone(), store).with_clock(fixed_clock(now()));

    let manager = AllowanceManager::new(settings, registry_with_percent(0.0))
        .with_budget_source(Arc::new(calibrator))
        .with_clock(fixed_clock(now()));

    let result = manager.compute_allowance(Provider::Claude).unwrap();
    // Calibrated 700k weekly: daily slice 100k, 10% cap, 5k reserve.
    assert_eq!(result.weekly_budget, 700_000);
    assert_eq!(result.allowance, 5_000);
}
