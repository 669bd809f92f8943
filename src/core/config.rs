//! Budget configuration surface.
//!
//! The option set consumed by the admission-control core. File discovery and
//! merging with CLI flags are owned by the embedding application; this module
//! only defines the typed settings, their defaults, and validation.
//!
//! ## TOML Format
//!
//! ```toml
//! [budget]
//! mode = "weekly"
//! max_percent = 75
//! reserve_percent = 5
//! aggressive_end_of_week = true
//! billing_mode = "subscription"
//! calibrate_enabled = true
//! week_start_day = "monday"
//! weekly_tokens = 500000
//!
//! [budget.provider_tokens]
//! claude = 700000
//! codex = 300000
//! ```

use std::collections::HashMap;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::core::provider::Provider;
use crate::error::{Result, SpendcapError};

/// Default cap on how much of the base budget a single cycle may spend.
pub const DEFAULT_MAX_PERCENT: u8 = 75;

/// Default safety margin subtracted after the cap.
pub const DEFAULT_RESERVE_PERCENT: u8 = 5;

/// Default global weekly token budget when nothing better is known.
pub const DEFAULT_WEEKLY_TOKENS: i64 = 500_000;

// =============================================================================
// Enums
// =============================================================================

/// Budget pacing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// Pace against a daily slice (weekly budget / 7).
    Daily,
    /// Pace against the remaining weekly budget.
    #[default]
    Weekly,
}

impl BudgetMode {
    /// Parse from a configuration string.
    pub fn from_str_value(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(SpendcapError::InvalidMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

/// How the subscription is billed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingMode {
    /// Flat-rate subscription with an opaque quota; calibration applies.
    #[default]
    Subscription,
    /// Metered API billing; the configured budget is authoritative.
    Api,
}

/// First day of the billing week.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStartDay {
    Sunday,
    #[default]
    Monday,
}

impl WeekStartDay {
    /// The chrono weekday this start day corresponds to.
    #[must_use]
    pub const fn weekday(self) -> Weekday {
        match self {
            Self::Sunday => Weekday::Sun,
            Self::Monday => Weekday::Mon,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Budget settings consumed by the Allowance Manager and Calibrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Pacing mode.
    pub mode: BudgetMode,
    /// Cap on how much of the base budget may be spent (0-100).
    pub max_percent: u8,
    /// Safety margin subtracted after the cap (0-100).
    pub reserve_percent: u8,
    /// Accelerate spending when a weekly reset is close (weekly mode only).
    pub aggressive_end_of_week: bool,
    /// Subscription vs metered API billing.
    pub billing_mode: BillingMode,
    /// Whether statistical budget calibration is enabled.
    pub calibrate_enabled: bool,
    /// First day of the billing week.
    pub week_start_day: WeekStartDay,
    /// Global weekly token budget fallback.
    pub weekly_tokens: i64,
    /// Per-provider weekly token overrides, keyed by CLI name.
    pub provider_tokens: HashMap<String, i64>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            mode: BudgetMode::default(),
            max_percent: DEFAULT_MAX_PERCENT,
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            aggressive_end_of_week: false,
            billing_mode: BillingMode::default(),
            calibrate_enabled: true,
            week_start_day: WeekStartDay::default(),
            weekly_tokens: DEFAULT_WEEKLY_TOKENS,
            provider_tokens: HashMap::new(),
        }
    }
}

/// Root structure for a `[budget]` TOML table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct BudgetFile {
    budget: BudgetSettings,
}

impl BudgetSettings {
    /// Parse settings from a TOML document containing a `[budget]` table.
    ///
    /// # Errors
    /// Returns an error if the document does not parse or the parsed settings
    /// fail validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: BudgetFile = toml::from_str(content)
            .map_err(|e| SpendcapError::Config(format!("budget settings parse error: {e}")))?;
        file.budget.validate()?;
        Ok(file.budget)
    }

    /// Validate option values.
    ///
    /// # Errors
    /// Returns an error if any percentage exceeds 100 or any token budget is
    /// non-positive.
    pub fn validate(&self) -> Result<()> {
        if self.max_percent > 100 {
            return Err(SpendcapError::Config(format!(
                "max_percent must be 0-100, got {}",
                self.max_percent
            )));
        }
        if self.reserve_percent > 100 {
            return Err(SpendcapError::Config(format!(
                "reserve_percent must be 0-100, got {}",
                self.reserve_percent
            )));
        }
        if self.weekly_tokens <= 0 {
            return Err(SpendcapError::Config(format!(
                "weekly_tokens must be greater than 0, got {}",
                self.weekly_tokens
            )));
        }
        for (name, tokens) in &self.provider_tokens {
            if *tokens <= 0 {
                return Err(SpendcapError::Config(format!(
                    "provider_tokens.{name} must be greater than 0, got {tokens}"
                )));
            }
        }
        Ok(())
    }

    /// The configured weekly token budget for a provider.
    ///
    /// Per-provider override first, then the global default.
    #[must_use]
    pub fn weekly_tokens_for(&self, provider: Provider) -> i64 {
        self.provider_tokens
            .get(provider.cli_name())
            .copied()
            .unwrap_or(self.weekly_tokens)
    }
}

// =============================================================================
// Tests
// =============================================================================
