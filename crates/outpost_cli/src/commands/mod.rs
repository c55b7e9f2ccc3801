//! CLI command implementations.

pub mod dump_wal;
pub mod inspect;
pub mod migrate;
pub mod reset;
pub mod verify;

use outpost_core::{AppDirs, Config, Database};
use std::path::Path;

/// Opens the store under `base` without creating anything.
pub fn open_store(base: &Path) -> Result<Database, Box<dyn std::error::Error>> {
    let dirs = AppDirs::new(base);
    if !dirs.database.is_dir() {
        return Err(format!("No store found under {}", base.display()).into());
    }
    let config = Config::default().create_if_missing(false);
    Ok(Database::open_with_config(&dirs.database, config)?)
}
