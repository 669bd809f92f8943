//! Admission-control core: allowance, calibration, and projection.

pub mod allowance;
pub mod calibration;
pub mod config;
pub mod logging;
pub mod projection;
pub mod provider;
pub mod source;
pub mod trend;
pub mod week;

pub use allowance::{AllowanceManager, AllowanceResult};
pub use calibration::{
    BudgetEstimate, BudgetOrigin, CalibrationResult, Calibrator, Confidence,
};
pub use config::{BillingMode, BudgetMode, BudgetSettings, WeekStartDay};
pub use logging::{LogFormat, LogLevel};
pub use projection::{BudgetProjection, ProjectionEngine, ProjectionReport};
pub use provider::Provider;
pub use source::{
    BudgetSource, Clock, FnUsageSource, SourceRegistry, TrendPredictor, UsageSource, fixed_clock,
    system_clock,
};
pub use trend::HourlyTrendPredictor;
