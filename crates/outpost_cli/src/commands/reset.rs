//! Reset command implementation.

use outpost_core::AppDirs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::warn;

/// Wipes the database directory under `base`.
///
/// Photos are left in place. Without `yes` the user is asked first.
pub fn run(base: &Path, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = AppDirs::new(base);
    if !dirs.database.exists() {
        println!("Nothing to reset at {}", dirs.database.display());
        return Ok(());
    }

    if !yes && !confirm(&dirs.database)? {
        println!("Aborted.");
        return Ok(());
    }

    warn!(path = %dirs.database.display(), "wiping store");
    dirs.wipe_database()?;
    println!("✓ Store removed; the client will resync on next launch.");
    Ok(())
}

fn confirm(path: &Path) -> io::Result<bool> {
    print!("Delete {}? [y/N] ", path.display());
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reset_removes_database_only() {
        let temp = tempdir().unwrap();
        let dirs = AppDirs::new(temp.path());
        dirs.create_all().unwrap();
        std::fs::write(dirs.photos.join("a.jpg"), b"jpeg").unwrap();

        run(temp.path(), true).unwrap();
        assert!(!dirs.database.join("wal.log").exists());
        assert!(dirs.photos.join("a.jpg").exists());
    }

    #[test]
    fn reset_missing_store_is_noop() {
        let temp = tempdir().unwrap();
        run(temp.path(), true).unwrap();
    }
}
