//! Weekly budget calibration.
//!
//! Subscriptions rarely expose their true token budget. Each snapshot pairs a
//! locally counted token total with the provider's reported usage percentage,
//! which implies a total budget (`local_tokens / (pct / 100)`). This module
//! turns a week of those noisy implied totals into a single estimate using
//! robust statistics: median, MAD outlier rejection, and a
//! coefficient-of-variation confidence score.
//!
//! Calibration is a pure function over the snapshot set for a given instant:
//! no mutation, fully re-derivable, safe to recompute on every call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::{BillingMode, BudgetSettings};
use crate::core::provider::Provider;
use crate::core::source::{BudgetSource, Clock, system_clock};
use crate::core::week;
use crate::error::Result;
use crate::storage::SnapshotStore;

/// Usable band for scraped percentages. Near 0% has high relative error,
/// near 100% may already reflect a stale or rolled-over cycle.
const MIN_USABLE_PERCENT: f64 = 10.0;
const MAX_USABLE_PERCENT: f64 = 95.0;

/// Deviation multiplier for MAD outlier rejection.
const MAD_CUTOFF: f64 = 3.0;

/// Subscriptions are sold in round numbers; reporting 487,234 would be
/// spuriously precise.
const BUDGET_GRANULARITY: f64 = 1000.0;

// =============================================================================
// Estimate Types
// =============================================================================

/// Where a budget figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetOrigin {
    /// Declared in configuration.
    Config,
    /// Metered API billing; the configured figure is authoritative.
    Api,
    /// Inferred from API- or log-sourced usage percentages.
    Calibrated,
    /// Inferred from page-scraped usage percentages.
    Scraped,
}

/// How much trust to place in an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

/// Weekly budget estimate, produced fresh on every call.
///
/// Never persisted directly; it is a computed view over snapshots and
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEstimate {
    /// Estimated weekly token budget.
    pub weekly_tokens: i64,
    /// Provenance of the figure.
    pub source: BudgetOrigin,
    /// Trust level.
    pub confidence: Confidence,
    /// Number of samples surviving filtering.
    pub sample_count: usize,
    /// Variance of the surviving implied totals.
    pub variance: f64,
}

/// Output of one calibration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Inferred weekly budget, rounded to the nearest 1000.
    pub inferred_budget: i64,
    /// Trust level.
    pub confidence: Confidence,
    /// Number of samples surviving filtering.
    pub sample_count: usize,
    /// Variance of the surviving implied totals.
    pub variance: f64,
    /// Provenance of the figure.
    pub source: BudgetOrigin,
}

impl CalibrationResult {
    fn from_config(settings: &BudgetSettings, provider: Provider, source: BudgetOrigin, confidence: Confidence) -> Self {
        Self {
            inferred_budget: settings.weekly_tokens_for(provider),
            confidence,
            sample_count: 0,
            variance: 0.0,
            source,
        }
    }
}

// =============================================================================
// Calibrator
// =============================================================================

/// Infers the true weekly budget of a subscription from usage samples.
pub struct Calibrator {
    settings: BudgetSettings,
    store: Arc<dyn SnapshotStore>,
    clock: Clock,
}

impl Calibrator {
    /// Create a calibrator over a snapshot store.
    #[must_use]
    pub fn new(settings: BudgetSettings, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            settings,
            store,
            clock: system_clock(),
        }
    }

    /// Replace the clock (for tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Calibrate the weekly budget for a provider from this billing cycle's
    /// samples.
    ///
    /// Short-circuits: metered API billing returns the configured budget as
    /// authoritative; disabled calibration returns the configured budget with
    /// empty confidence. Insufficient or unusable history is a non-error and
    /// also falls back to configuration.
    ///
    /// # Errors
    /// Returns an error only when the snapshot store query itself fails.
    pub fn calibrate(&self, provider: Provider) -> Result<CalibrationResult> {
        if self.settings.billing_mode == BillingMode::Api {
            return Ok(CalibrationResult::from_config(
                &self.settings,
                provider,
                BudgetOrigin::Api,
                Confidence::High,
            ));
        }
        if !self.settings.calibrate_enabled {
            return Ok(CalibrationResult::from_config(
                &self.settings,
                provider,
                BudgetOrigin::Config,
                Confidence::None,
            ));
        }

        let now = (self.clock)();
        let cycle_start = week::week_start(now, self.settings.week_start_day);
        let snapshots = self.store.snapshots_in_range(provider, cycle_start, now)?;

        let implied: Vec<f64> = snapshots
            .iter()
            .filter(|s| s.local_tokens > 0)
            .filter_map(|s| s.scraped_used_percent.map(|pct| (s.local_tokens, pct)))
            .filter(|(_, pct)| (MIN_USABLE_PERCENT..=MAX_USABLE_PERCENT).contains(pct))
            .map(|(tokens, pct)| {
                #[allow(clippy::cast_precision_loss)] // token counts are far below 2^52
                let tokens = tokens as f64;
                tokens / (pct / 100.0)
            })
            .collect();

        // Below 3 samples there is not enough data to detect outliers reliably.
        let filtered = if implied.len() >= 3 {
            reject_outliers(&implied)
        } else {
            implied
        };

        if filtered.is_empty() {
            tracing::debug!(
                provider = provider.cli_name(),
                "no usable calibration samples this cycle"
            );
            return Ok(CalibrationResult::from_config(
                &self.settings,
                provider,
                BudgetOrigin::Config,
                Confidence::None,
            ));
        }

        let med = median(&filtered);
        let var = variance(&filtered);
        let cv = if med == 0.0 {
            f64::INFINITY
        } else {
            var.sqrt() / med
        };

        let rounded = round_to_granularity(med);
        if rounded <= 0 {
            // A non-positive inferred value never overrides configuration.
            return Ok(CalibrationResult::from_config(
                &self.settings,
                provider,
                BudgetOrigin::Config,
                Confidence::None,
            ));
        }

        let source = if provider.scraped_usage() {
            BudgetOrigin::Scraped
        } else {
            BudgetOrigin::Calibrated
        };

        let result = CalibrationResult {
            inferred_budget: rounded,
            confidence: score_confidence(filtered.len(), cv),
            sample_count: filtered.len(),
            variance: var,
            source,
        };

        tracing::debug!(
            provider = provider.cli_name(),
            budget = result.inferred_budget,
            samples = result.sample_count,
            cv,
            "calibrated weekly budget"
        );

        Ok(result)
    }
}

impl BudgetSource for Calibrator {
    fn budget_estimate(&self, provider: Provider) -> Result<BudgetEstimate> {
        let result = self.calibrate(provider)?;
        Ok(BudgetEstimate {
            weekly_tokens: result.inferred_budget,
            source: result.source,
            confidence: result.confidence,
            sample_count: result.sample_count,
            variance: result.variance,
        })
    }
}

// =============================================================================
// Robust Statistics
// =============================================================================

/// Reject samples deviating more than `MAD_CUTOFF` MADs from the median.
///
/// A MAD of zero means no real spread; only exact matches to the median are
/// kept, falling back to the full set if that empties it.
fn reject_outliers(values: &[f64]) -> Vec<f64> {
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations);

    if mad == 0.0 {
        let exact: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| (v - med).abs() < f64::EPSILON)
            .collect();
        if exact.is_empty() {
            return values.to_vec();
        }
        return exact;
    }

    values
        .iter()
        .copied()
        .filter(|v| (v - med).abs() <= MAD_CUTOFF * mad)
        .collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)] // sample counts are small
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

const fn score_confidence(sample_count: usize, cv: f64) -> Confidence {
    match sample_count {
        0 => Confidence::None,
        1..=2 => Confidence::Low,
        3..=5 => {
            if cv <= 0.15 {
                Confidence::Medium
            } else {
                Confidence::Low
            }
        }
        _ => {
            if cv <= 0.10 {
                Confidence::High
            } else if cv <= 0.15 {
                Confidence::Medium
            } else {
                Confidence::Low
            }
        }
    }
}

fn round_to_granularity(value: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)] // budgets are far below 2^52
    let rounded = ((value / BUDGET_GRANULARITY).round() * BUDGET_GRANULARITY) as i64;
    rounded
}

// =============================================================================
// Tests
// =============================================================================
