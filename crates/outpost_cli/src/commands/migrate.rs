//! Migration commands.

use outpost_core::migration::{stored_version, MigrationInfo};
use outpost_core::{Database, MigrationManager, MigrationRunResult, ProtocolVersion};
use std::path::Path;
use tracing::info;

/// Shows the stored version and what is pending.
pub fn status(base: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Checking migration status under {:?}", base);

    let db = super::open_store(base)?;
    let stored = stored_version(&db)?;
    let pending = pending(&db)?;
    db.close()?;

    println!("Migration Status");
    println!("================");
    match stored {
        Some(v) => println!("  Stored version:  {v}"),
        None => println!("  Stored version:  none (new store)"),
    }
    println!("  Current version: {}", ProtocolVersion::CURRENT);
    println!("  Pending:         {}", pending.len());

    if !pending.is_empty() {
        println!("\nPending Migrations:");
        for migration in &pending {
            println!("  v{}: {}", migration.version, migration.name);
        }
    }
    Ok(())
}

/// Applies pending migrations.
pub fn run(base: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Running migrations under {:?}", base);

    let db = super::open_store(base)?;

    if dry_run {
        let pending = pending(&db)?;
        db.close()?;
        if pending.is_empty() {
            println!("✓ No pending migrations to run.");
        } else {
            println!("Dry run - would apply {} migration(s):", pending.len());
            for migration in &pending {
                println!("  v{}: {}", migration.version, migration.name);
            }
        }
        return Ok(());
    }

    let result = migrate(&db, &mut |message| println!("  {message}"));
    db.close()?;
    let result = result?;

    if result.applied_count() == 0 {
        println!("✓ No pending migrations to run.");
    } else {
        println!(
            "✓ Migrated from v{} to v{} ({} step(s))",
            result.from_version,
            result.final_version,
            result.applied_count()
        );
        if result.maintenance_requested {
            println!("  A maintenance pass was requested; run `outpost verify`.");
        }
    }
    Ok(())
}

/// Lists migrations the store still needs.
pub fn pending(db: &Database) -> Result<Vec<MigrationInfo>, Box<dyn std::error::Error>> {
    let from = stored_version(db)?.unwrap_or(0);
    Ok(MigrationManager::with_protocol_versions().pending(from))
}

/// Brings the store to the current protocol version.
pub fn migrate(
    db: &Database,
    progress: &mut dyn FnMut(&str),
) -> Result<MigrationRunResult, Box<dyn std::error::Error>> {
    Ok(MigrationManager::with_protocol_versions().run(db, progress)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::keys;

    #[test]
    fn pending_from_partial_store() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|txn| keys::put_record(txn, keys::PROTOCOL_VERSION, &23u32))
            .unwrap();

        let names: Vec<_> = pending(&db).unwrap().into_iter().map(|m| m.version).collect();
        assert_eq!(names, vec![24, 25]);
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = migrate(&db, &mut |_| {}).unwrap();
        assert_eq!(first.applied_count(), 25);

        let second = migrate(&db, &mut |_| {}).unwrap();
        assert_eq!(second.applied_count(), 0);
        assert!(pending(&db).unwrap().is_empty());
    }
}
