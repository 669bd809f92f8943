//! Daytime usage trend prediction.
//!
//! Scheduled runs share the weekly budget with a human using the same
//! subscription interactively. To avoid starving the human, the predictor
//! learns an hourly consumption profile from recent snapshots and estimates
//! how many tokens the rest of today will need; the allowance computation
//! subtracts that estimate up front.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::core::provider::Provider;
use crate::core::source::TrendPredictor;
use crate::storage::SnapshotStore;

/// Days of history the hourly profile is built from.
const PROFILE_WINDOW_DAYS: i64 = 7;

/// Predicts remaining same-day interactive consumption from an hourly
/// usage profile.
///
/// The profile averages the positive `local_daily` deltas between
/// consecutive snapshots taken on the same calendar day, keyed by the hour
/// the delta landed in. Counter resets at day boundaries produce negative
/// deltas and are ignored.
pub struct HourlyTrendPredictor {
    store: Arc<dyn SnapshotStore>,
}

impl HourlyTrendPredictor {
    /// Create a predictor over a snapshot store.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    fn hourly_profile(&self, provider: Provider, now: DateTime<Utc>) -> anyhow::Result<[f64; 24]> {
        let from = now - Duration::days(PROFILE_WINDOW_DAYS);
        let snapshots = self.store.snapshots_in_range(provider, from, now)?;

        let mut sums = [0.0_f64; 24];
        let mut counts = [0_u32; 24];

        for pair in snapshots.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);
            if earlier.taken_at.date_naive() != later.taken_at.date_naive() {
                continue;
            }
            let delta = later.local_daily - earlier.local_daily;
            if delta <= 0 {
                continue;
            }
            let hour = later.hour_of_day.min(23) as usize;
            #[allow(clippy::cast_precision_loss)] // per-hour deltas are small
            {
                sums[hour] += delta as f64;
            }
            counts[hour] += 1;
        }

        let mut profile = [0.0_f64; 24];
        for hour in 0..24 {
            if counts[hour] > 0 {
                profile[hour] = sums[hour] / f64::from(counts[hour]);
            }
        }
        Ok(profile)
    }
}

impl TrendPredictor for HourlyTrendPredictor {
    fn predict_daytime_usage(
        &self,
        provider: Provider,
        now: DateTime<Utc>,
        weekly_budget: i64,
    ) -> anyhow::Result<i64> {
        let profile = self.hourly_profile(provider, now)?;

        let remaining: f64 = profile[now.hour() as usize..].iter().sum();
        #[allow(clippy::cast_possible_truncation)] // token amounts are far below 2^52
        let predicted = remaining.round() as i64;
        let clamped = predicted.clamp(0, weekly_budget);

        tracing::debug!(
            provider = provider.cli_name(),
            predicted = clamped,
            from_hour = now.hour(),
            "predicted remaining daytime usage"
        );

        Ok(clamped)
    }
}
