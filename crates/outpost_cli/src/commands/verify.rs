//! Verify command implementation.

use outpost_core::{Database, MaintenanceEngine, MaintenanceReport, ProtocolVersion};
use std::path::Path;

/// Runs the verify command.
///
/// Repairs are committed; unrepairable findings leave the store untouched
/// and fail the command.
pub fn run(base: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store under {}", base.display());
    println!();

    let db = super::open_store(base)?;
    let report = verify(&db, &mut |message| println!("  {message}"))?;
    db.close()?;

    println!();
    for finding in &report.findings {
        println!("  {finding}");
    }
    if report.success() {
        println!(
            "✓ Verification passed ({} check(s), {} repaired)",
            report.checks_run,
            report.repaired()
        );
        Ok(())
    } else {
        println!(
            "✗ Verification failed: {} unrepairable finding(s)",
            report.unrepairable()
        );
        Err("Verification failed".into())
    }
}

/// Runs a forced pass with the built-in checks.
pub fn verify(
    db: &Database,
    progress: &mut dyn FnMut(&str),
) -> Result<MaintenanceReport, Box<dyn std::error::Error>> {
    let engine = MaintenanceEngine::with_builtin_checks(ProtocolVersion::CURRENT.as_u32());
    Ok(engine.run_report(db, true, false, progress)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::keys;

    #[test]
    fn verify_repairs_corrupt_setting() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|txn| {
            keys::put_record(txn, keys::PROTOCOL_VERSION, &25u32)?;
            txn.put(keys::UPLOAD_LOGS, vec![0xff])
        })
        .unwrap();

        let mut lines = Vec::new();
        let report = verify(&db, &mut |m| lines.push(m.to_string())).unwrap();
        assert!(report.success());
        assert_eq!(report.repaired(), 1);
        assert!(lines[0].starts_with("Checking data (1 of"));
        assert!(!db.contains(keys::UPLOAD_LOGS).unwrap());
    }

    #[test]
    fn verify_fails_on_future_version() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|txn| keys::put_record(txn, keys::PROTOCOL_VERSION, &99u32))
            .unwrap();

        let report = verify(&db, &mut |_| {}).unwrap();
        assert!(!report.success());
        assert!(!report.committed);
    }
}
