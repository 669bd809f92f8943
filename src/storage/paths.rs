//! Platform paths for the snapshot database.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::{Result, SpendcapError};

/// Default location of the snapshot database.
///
/// Linux: `~/.local/share/spendcap/snapshots.db`
/// macOS: `~/Library/Application Support/spendcap/snapshots.db`
///
/// # Errors
/// Returns an error if no home directory can be determined.
pub fn default_db_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "spendcap")
        .ok_or_else(|| SpendcapError::Config("could not determine data directory".to_string()))?;
    Ok(dirs.data_dir().join("snapshots.db"))
}
