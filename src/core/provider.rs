//! Provider descriptors.
//!
//! Defines the agent subscriptions this crate can budget and their metadata.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpendcapError};

// =============================================================================
// Provider Enum
// =============================================================================

/// Supported agent subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
    Cursor,
    Copilot,
}

impl Provider {
    /// All providers in display order.
    pub const ALL: &'static [Self] = &[
        Self::Claude,
        Self::Codex,
        Self::Gemini,
        Self::Cursor,
        Self::Copilot,
    ];

    /// CLI name for this provider.
    #[must_use]
    pub const fn cli_name(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Cursor => "cursor",
            Self::Copilot => "copilot",
        }
    }

    /// Display name for human output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini",
            Self::Cursor => "Cursor",
            Self::Copilot => "Copilot",
        }
    }

    /// Parse from a CLI name.
    pub fn from_cli_name(name: &str) -> Result<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.cli_name() == lower)
            .copied()
            .ok_or_else(|| SpendcapError::InvalidProvider(name.to_string()))
    }

    /// Whether this provider's usage percentage comes from a page scrape
    /// rather than an API or local session logs.
    ///
    /// Calibrated budgets for scraped providers are labeled `Scraped` so
    /// consumers can distinguish provenance for display; the math is the same.
    #[must_use]
    pub const fn scraped_usage(self) -> bool {
        matches!(self, Self::Cursor | Self::Copilot)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

// =============================================================================
// Tests
// =============================================================================
