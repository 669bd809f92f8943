//! Snapshot persistence.
//!
//! The admission-control core only reads snapshots; the periodic collector
//! that appends them is owned by the embedding application. The SQLite store
//! here implements the read contract and offers the append/cleanup helpers
//! the collector and tests need.

pub mod paths;
pub mod schema;
pub mod snapshots;

pub use snapshots::{NewSnapshot, Snapshot, SnapshotStore, SqliteSnapshotStore};
