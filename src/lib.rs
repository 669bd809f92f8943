//! spendcap - Admission control for AI coding agent subscriptions.
//!
//! Decides how many tokens a scheduled agent run may spend without starving
//! interactive use or blowing the weekly subscription budget. Three
//! components: the allowance manager grants a per-cycle spend ceiling, the
//! calibrator infers a subscription's true weekly budget from usage
//! snapshots, and the projection engine estimates when the budget runs out
//! relative to the next weekly reset.
//!
//! Usage readers, the run scheduler, and report rendering are external
//! collaborators supplied by the embedding application via the
//! [`core::UsageSource`], [`storage::SnapshotStore`], and
//! [`core::TrendPredictor`] contracts.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod core;
pub mod error;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ErrorCategory, Result, SpendcapError};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
