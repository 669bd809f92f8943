//! Error types for spendcap.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Fatal errors are categorized into five groups:
//! - **Budget**: the resolved weekly budget is unusable
//! - **Provider**: no usage source is registered for the named provider
//! - **Configuration**: invalid mode or option values
//! - **Upstream**: a collaborator (usage source, snapshot store, trend
//!   predictor) failed; the original cause is wrapped, never retried here
//!
//! "Insufficient data" is deliberately *not* an error anywhere in this crate:
//! the Calibrator reports empty confidence and the Projection Engine returns
//! `None`, because absence of history is the expected steady state for a new
//! installation. Callers of the Allowance Manager are expected to treat any
//! fatal error as "do not run work this cycle" — fail closed, never assume an
//! unlimited budget.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Budget resolution produced an unusable value.
    Budget,
    /// Provider-level issues (unregistered usage source).
    Provider,
    /// Configuration issues (invalid mode, bad option values).
    Configuration,
    /// A consumed collaborator failed.
    Upstream,
    /// Internal errors (bugs, I/O, serialization).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Budget => "Budget error",
            Self::Provider => "Provider error",
            Self::Configuration => "Configuration error",
            Self::Upstream => "Upstream error",
            Self::Internal => "Internal error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Main error type for spendcap operations.
#[derive(Error, Debug)]
pub enum SpendcapError {
    /// The resolved weekly budget was zero or negative.
    ///
    /// Fatal to the current call; budget resolution is never retried here.
    #[error("invalid weekly budget for {provider}: {resolved} tokens")]
    InvalidBudget { provider: String, resolved: i64 },

    /// No usage source is registered for the named provider.
    #[error("no usage source registered for provider: {0}")]
    ProviderUnavailable(String),

    /// The configured budget mode is neither daily nor weekly.
    #[error("invalid budget mode: {0}")]
    InvalidMode(String),

    /// A consumed collaborator failed; the original cause is wrapped.
    #[error("upstream query failed for {provider} ({operation})")]
    Upstream {
        provider: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid provider name.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpendcapError {
    /// Wrap a collaborator failure with provider and operation context.
    pub fn upstream(
        provider: impl Into<String>,
        operation: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Upstream {
            provider: provider.into(),
            operation,
            source: source.into(),
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidBudget { .. } => ErrorCategory::Budget,
            Self::ProviderUnavailable(_) => ErrorCategory::Provider,
            Self::InvalidMode(_) | Self::Config(_) | Self::InvalidProvider(_) => {
                ErrorCategory::Configuration
            }
            Self::Upstream { .. } => ErrorCategory::Upstream,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may reasonably retry the failed call.
    ///
    /// Only upstream failures are retryable; retry policy belongs to the
    /// scheduler, never to this crate.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }

    /// Returns the provider name if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::InvalidBudget { provider, .. } | Self::Upstream { provider, .. } => {
                Some(provider)
            }
            Self::ProviderUnavailable(p) | Self::InvalidProvider(p) => Some(p),
            _ => None,
        }
    }
}

/// Result type alias for spendcap operations.
pub type Result<T> = std::result::Result<T, SpendcapError>;

// =============================================================================
// Tests
// =============================================================================
