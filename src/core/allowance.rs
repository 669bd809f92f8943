//! Per-cycle spend allowance computation.
//!
//! Converts a provider's reported usage percentage into the number of tokens
//! the current scheduled run may spend, honoring daily/weekly pacing, the
//! max-percent cap, the safety reserve, and end-of-week acceleration.
//!
//! Failure semantics: any upstream error (budget resolution, usage query,
//! reset-time lookup, trend prediction) is surfaced to the caller with
//! context; none are retried here. Callers treat a fatal error as "do not run
//! work this cycle".

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::calibration::{BudgetEstimate, BudgetOrigin, Confidence};
use crate::core::config::{BudgetMode, BudgetSettings};
use crate::core::provider::Provider;
use crate::core::source::{BudgetSource, Clock, SourceRegistry, TrendPredictor, system_clock};
use crate::core::week;
use crate::error::{Result, SpendcapError};

// =============================================================================
// Allowance Result
// =============================================================================

/// The spend ceiling granted to one scheduled run.
///
/// Created once per invocation and immutable afterwards; the caller decides
/// whether to log it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceResult {
    /// Tokens this cycle may spend. Never negative.
    pub allowance: i64,
    /// Resolved weekly budget the computation was based on.
    pub weekly_budget: i64,
    /// Base the reserve was taken from: the daily slice in daily mode, the
    /// remaining weekly budget in weekly mode.
    pub budget_base: i64,
    /// Usage percentage reported by the provider.
    pub used_percent: f64,
    /// Safety margin subtracted after the cap.
    pub reserve_amount: i64,
    /// Predicted remaining same-day interactive consumption.
    pub predicted_usage: i64,
    /// Allowance before the prediction was subtracted (for observability).
    pub pre_prediction_allowance: i64,
    /// Pacing mode the computation ran in.
    pub mode: BudgetMode,
    /// Days until the weekly reset (weekly mode only).
    pub remaining_days: Option<u32>,
    /// End-of-week acceleration multiplier (1.0 when inactive).
    pub multiplier: f64,
    /// Provenance of the weekly budget.
    pub budget_source: BudgetOrigin,
    /// Trust level of the weekly budget.
    pub budget_confidence: Confidence,
    /// Samples behind the weekly budget estimate.
    pub budget_sample_count: usize,
}

// =============================================================================
// Allowance Manager
// =============================================================================

/// Computes the spend ceiling for scheduled runs.
///
/// Stateless between calls; the only mutable field is the injectable clock,
/// set once at construction. Safe to call concurrently for different
/// providers.
pub struct AllowanceManager {
    settings: BudgetSettings,
    sources: SourceRegistry,
    budget_source: Option<Arc<dyn BudgetSource>>,
    trend: Option<Arc<dyn TrendPredictor>>,
    clock: Clock,
}

impl AllowanceManager {
    /// Create a manager over a set of registered usage sources.
    #[must_use]
    pub fn new(settings: BudgetSettings, sources: SourceRegistry) -> Self {
        Self {
            settings,
            sources,
            budget_source: None,
            trend: None,
            clock: system_clock(),
        }
    }

    /// Attach a calibrated budget source.
    #[must_use]
    pub fn with_budget_source(mut self, source: Arc<dyn BudgetSource>) -> Self {
        self.budget_source = Some(source);
        self
    }

    /// Attach a trend predictor protecting interactive daytime use.
    #[must_use]
    pub fn with_trend_predictor(mut self, predictor: Arc<dyn TrendPredictor>) -> Self {
        self.trend = Some(predictor);
        self
    }

    /// Replace the clock (for tests).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Compute the token allowance for the current cycle.
    ///
    /// # Errors
    /// - [`SpendcapError::InvalidBudget`] when the resolved weekly budget is
    ///   non-positive
    /// - [`SpendcapError::ProviderUnavailable`] when no usage source is
    ///   registered for the provider
    /// - [`SpendcapError::Upstream`] when a collaborator query fails
    pub fn compute_allowance(&self, provider: Provider) -> Result<AllowanceResult> {
        let estimate = self.resolve_budget(provider)?;
        let weekly_budget = estimate.weekly_tokens;
        if weekly_budget <= 0 {
            return Err(SpendcapError::InvalidBudget {
                provider: provider.cli_name().to_string(),
                resolved: weekly_budget,
            });
        }

        let source = self
            .sources
            .get(provider)
            .ok_or_else(|| SpendcapError::ProviderUnavailable(provider.cli_name().to_string()))?;

        let used_percent = source
            .used_percent(self.settings.mode)
            .map_err(|e| SpendcapError::upstream(provider.cli_name(), "used_percent", e))?;

        let now = (self.clock)();
        #[allow(clippy::cast_precision_loss)] // budgets are far below 2^52
        let weekly = weekly_budget as f64;
        let remaining_fraction = 1.0 - used_percent / 100.0;
        let max_fraction = f64::from(self.settings.max_percent) / 100.0;

        let (raw, budget_base, multiplier, remaining_days) = match self.settings.mode {
            BudgetMode::Daily => {
                let daily_budget = weekly / 7.0;
                let available = daily_budget * remaining_fraction;
                let raw = (available * max_fraction).min(available);
                (raw, daily_budget, 1.0, None)
            }
            BudgetMode::Weekly => {
                let reset = source
                    .reset_time(BudgetMode::Weekly)
                    .map_err(|e| SpendcapError::upstream(provider.cli_name(), "reset_time", e))?
                    .unwrap_or_else(|| week::next_week_reset(now, self.settings.week_start_day));
                let remaining_days = week::days_until_reset(now, reset);

                let remaining_weekly = weekly * remaining_fraction;
                let multiplier = if self.settings.aggressive_end_of_week && remaining_days <= 2 {
                    // Linear ramp toward the reset: 2x with one day left,
                    // 1x with two days left.
                    f64::from(3 - remaining_days)
                } else {
                    1.0
                };
                let raw =
                    (remaining_weekly / f64::from(remaining_days)) * max_fraction * multiplier;
                (raw, remaining_weekly, multiplier, Some(remaining_days))
            }
        };

        let pre_reserve = raw.max(0.0);
        // A negative base means the provider is already over budget; the
        // reserve never turns that into extra allowance.
        let reserve_amount =
            (budget_base * f64::from(self.settings.reserve_percent) / 100.0).max(0.0);
        let after_reserve = (pre_reserve - reserve_amount).max(0.0);

        let predicted_usage = match &self.trend {
            Some(predictor) => predictor
                .predict_daytime_usage(provider, now, weekly_budget)
                .map_err(|e| {
                    SpendcapError::upstream(provider.cli_name(), "predict_daytime_usage", e)
                })?
                .max(0),
            None => 0,
        };

        #[allow(clippy::cast_precision_loss)]
        let allowance = (after_reserve - predicted_usage as f64).max(0.0);

        let result = AllowanceResult {
            allowance: round_tokens(allowance),
            weekly_budget,
            budget_base: round_tokens(budget_base),
            used_percent,
            reserve_amount: round_tokens(reserve_amount),
            predicted_usage,
            pre_prediction_allowance: round_tokens(after_reserve),
            mode: self.settings.mode,
            remaining_days,
            multiplier,
            budget_source: estimate.source,
            budget_confidence: estimate.confidence,
            budget_sample_count: estimate.sample_count,
        };

        tracing::debug!(
            provider = provider.cli_name(),
            allowance = result.allowance,
            used_percent,
            mode = %result.mode,
            "computed allowance"
        );

        Ok(result)
    }

    /// Resolve the weekly budget: calibrated estimate when positive, then the
    /// configured per-provider or global figure.
    fn resolve_budget(&self, provider: Provider) -> Result<BudgetEstimate> {
        if let Some(source) = &self.budget_source {
            let estimate = source.budget_estimate(provider)?;
            if estimate.weekly_tokens > 0 {
                return Ok(estimate);
            }
        }

        Ok(BudgetEstimate {
            weekly_tokens: self.settings.weekly_tokens_for(provider),
            source: BudgetOrigin::Config,
            confidence: Confidence::None,
            sample_count: 0,
            variance: 0.0,
        })
    }
}

fn round_tokens(value: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)] // token amounts are far below 2^52
    let rounded = value.round() as i64;
    rounded
}

// =============================================================================
// Tests
// =============================================================================
