//! Collaborator contracts consumed by the admission-control core.
//!
//! A provider's usage surface is just two functions: a usage percentage and an
//! optional reset time. Providers are registered against a capability registry
//! rather than modeled as an inheritance hierarchy. The clock is injectable so
//! tests can fix "now" deterministically; there is no ambient global state in
//! this crate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::calibration::BudgetEstimate;
use crate::core::config::BudgetMode;
use crate::core::provider::Provider;
use crate::error::Result;

// =============================================================================
// Clock
// =============================================================================

/// Injectable clock, set once at construction.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The system clock.
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock pinned to a fixed instant.
#[must_use]
pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

// =============================================================================
// Usage Source
// =============================================================================

/// Live usage surface for one provider.
///
/// Implementations query the provider's API, CLI, or on-disk session logs;
/// that plumbing lives in the embedding application. Failures are surfaced
/// as-is and wrapped with context by the caller; nothing here retries.
pub trait UsageSource: Send + Sync {
    /// Usage percentage for the given window (0-100, may exceed 100 when the
    /// provider is over budget).
    fn used_percent(&self, mode: BudgetMode) -> anyhow::Result<f64>;

    /// Reset time for the given window, when the provider tracks one.
    fn reset_time(&self, _mode: BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

/// A usage source built from plain closures.
pub struct FnUsageSource<U, R>
where
    U: Fn(BudgetMode) -> anyhow::Result<f64> + Send + Sync,
    R: Fn(BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>> + Send + Sync,
{
    used_percent: U,
    reset_time: R,
}

impl<U> FnUsageSource<U, fn(BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>>>
where
    U: Fn(BudgetMode) -> anyhow::Result<f64> + Send + Sync,
{
    /// Build a source that only reports a usage percentage.
    pub fn new(used_percent: U) -> Self {
        Self {
            used_percent,
            reset_time: |_| Ok(None),
        }
    }
}

impl<U, R> FnUsageSource<U, R>
where
    U: Fn(BudgetMode) -> anyhow::Result<f64> + Send + Sync,
    R: Fn(BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>> + Send + Sync,
{
    /// Build a source that reports both a percentage and a reset time.
    pub fn with_reset(used_percent: U, reset_time: R) -> Self {
        Self {
            used_percent,
            reset_time,
        }
    }
}

impl<U, R> UsageSource for FnUsageSource<U, R>
where
    U: Fn(BudgetMode) -> anyhow::Result<f64> + Send + Sync,
    R: Fn(BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>> + Send + Sync,
{
    fn used_percent(&self, mode: BudgetMode) -> anyhow::Result<f64> {
        (self.used_percent)(mode)
    }

    fn reset_time(&self, mode: BudgetMode) -> anyhow::Result<Option<DateTime<Utc>>> {
        (self.reset_time)(mode)
    }
}

// =============================================================================
// Source Registry
// =============================================================================

/// Capability registry mapping providers to their usage sources.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<Provider, Box<dyn UsageSource>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a usage source for a provider, replacing any existing one.
    pub fn register(&mut self, provider: Provider, source: Box<dyn UsageSource>) {
        self.sources.insert(provider, source);
    }

    /// Look up the usage source for a provider.
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&dyn UsageSource> {
        self.sources.get(&provider).map(Box::as_ref)
    }

    /// Providers with a registered source, in display order.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.sources.contains_key(p))
            .collect()
    }
}

// =============================================================================
// Budget Source
// =============================================================================

/// Adapter view over the Calibrator for the Allowance Manager.
///
/// Optional: when absent the manager falls back to the configured budget and
/// records the fallback through the estimate's provenance fields.
pub trait BudgetSource: Send + Sync {
    /// The current best weekly-budget estimate for a provider.
    fn budget_estimate(&self, provider: Provider) -> Result<BudgetEstimate>;
}

// =============================================================================
// Trend Predictor
// =============================================================================

/// Predicts remaining same-day interactive consumption.
///
/// Optional: when configured, the Allowance Manager subtracts the prediction
/// so scheduled runs do not starve interactive daytime use.
pub trait TrendPredictor: Send + Sync {
    /// Tokens expected to be consumed interactively during the rest of today.
    fn predict_daytime_usage(
        &self,
        provider: Provider,
        now: DateTime<Utc>,
        weekly_budget: i64,
    ) -> anyhow::Result<i64>;
}

// =============================================================================
// Tests
// =============================================================================
