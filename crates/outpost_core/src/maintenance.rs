//! Integrity checking and repair ("FSCK").
//!
//! A pass runs every registered [`IntegrityCheck`] inside one transaction.
//! Repairs and the clearing of the trigger marker commit together, and only
//! when no check found something it cannot fix; a crash mid-pass leaves the
//! store as it was.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::identity::AuthMetadata;
use crate::keys;
use crate::settings::{RegistrationVersion, SystemMessage, BOOL_KEYS};
use crate::store::Transaction;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

/// One problem found by a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// The check fixed the problem in the pass transaction.
    Repaired {
        /// Check that reported it.
        check: String,
        /// What was wrong and what was done.
        detail: String,
    },
    /// The problem cannot be fixed automatically.
    Unrepairable {
        /// Check that reported it.
        check: String,
        /// What was wrong.
        detail: String,
    },
}

impl Finding {
    /// Returns true for unrepairable findings.
    #[must_use]
    pub fn is_unrepairable(&self) -> bool {
        matches!(self, Self::Unrepairable { .. })
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repaired { check, detail } => write!(f, "[{check}] repaired: {detail}"),
            Self::Unrepairable { check, detail } => write!(f, "[{check}] unrepairable: {detail}"),
        }
    }
}

/// Collects findings while checks run.
#[derive(Debug, Default)]
pub struct CheckReport {
    current: String,
    findings: Vec<Finding>,
}

impl CheckReport {
    /// Records a problem the check has already fixed.
    pub fn repaired(&mut self, detail: impl Into<String>) {
        self.findings.push(Finding::Repaired {
            check: self.current.clone(),
            detail: detail.into(),
        });
    }

    /// Records a problem the check cannot fix.
    pub fn unrepairable(&mut self, detail: impl Into<String>) {
        self.findings.push(Finding::Unrepairable {
            check: self.current.clone(),
            detail: detail.into(),
        });
    }

    /// Returns every finding so far.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// True if any finding is unrepairable.
    #[must_use]
    pub fn has_unrepairable(&self) -> bool {
        self.findings.iter().any(Finding::is_unrepairable)
    }

    fn begin_check(&mut self, name: &str) {
        self.current = name.to_string();
    }
}

/// A consistency check over part of the store.
///
/// Checks repair what they can through `txn` and report everything through
/// `report`. Domain collaborators register their own checks.
pub trait IntegrityCheck: Send + Sync {
    /// Returns the name shown in progress messages.
    fn name(&self) -> &str;

    /// Checks, and where possible repairs, in the pass transaction.
    ///
    /// An `Err` aborts the whole pass.
    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()>;
}

/// Why a pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTrigger {
    /// The caller asked for it.
    Forced,
    /// A migration persisted the "fsck requested" marker.
    Requested,
    /// The previous session did not shut down cleanly.
    UncleanShutdown,
}

/// Outcome of one maintenance call.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Why the pass ran; `None` if nothing triggered it.
    pub trigger: Option<MaintenanceTrigger>,
    /// Number of checks run.
    pub checks_run: usize,
    /// Everything the checks reported.
    pub findings: Vec<Finding>,
    /// True if repairs and marker clearing were committed.
    pub committed: bool,
}

impl MaintenanceReport {
    /// Number of repaired findings.
    #[must_use]
    pub fn repaired(&self) -> usize {
        self.findings.iter().filter(|f| !f.is_unrepairable()).count()
    }

    /// Number of unrepairable findings.
    #[must_use]
    pub fn unrepairable(&self) -> usize {
        self.findings.iter().filter(|f| f.is_unrepairable()).count()
    }

    /// True if the pass left the store consistent (or nothing needed to run).
    #[must_use]
    pub fn success(&self) -> bool {
        self.unrepairable() == 0
    }
}

/// Runs integrity checks when something calls for it.
pub struct MaintenanceEngine {
    checks: Vec<Box<dyn IntegrityCheck>>,
    running: AtomicBool,
}

impl MaintenanceEngine {
    /// Creates an engine with no checks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Creates an engine with the checks over the core's own records.
    #[must_use]
    pub fn with_builtin_checks(current_version: u32) -> Self {
        let mut engine = Self::new();
        engine.register(Box::new(ProtocolVersionCheck { current_version }));
        engine.register(Box::new(OpIdCheck));
        engine.register(Box::new(AuthCheck));
        engine.register(Box::new(DeviceUuidCheck));
        engine.register(Box::new(SettingsCheck));
        engine
    }

    /// Adds a check; checks run in registration order.
    pub fn register(&mut self, check: Box<dyn IntegrityCheck>) {
        self.checks.push(check);
    }

    /// Returns the names of the registered checks.
    #[must_use]
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// True while a pass is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs a pass if forced, requested by a migration, or after an unclean
    /// shutdown, and reports what happened.
    ///
    /// # Errors
    ///
    /// Store failures and errors returned by a check abort the pass with no
    /// changes. `InvalidOperation` if a pass is already running.
    pub fn run_report(
        &self,
        db: &Database,
        force: bool,
        unclean_shutdown: bool,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<MaintenanceReport> {
        let requested = keys::get_record::<bool>(db, keys::FSCK_REQUESTED)
            .unwrap_or(Some(true))
            .unwrap_or(false);

        let trigger = if force {
            MaintenanceTrigger::Forced
        } else if requested {
            MaintenanceTrigger::Requested
        } else if unclean_shutdown {
            MaintenanceTrigger::UncleanShutdown
        } else {
            return Ok(MaintenanceReport::default());
        };

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::invalid_operation("maintenance already running"));
        }
        let _guard = RunningGuard {
            running: &self.running,
        };
        self.run_checks(db, trigger, progress)
    }

    /// Runs a pass when triggered and returns whether the store is left
    /// consistent. Never fails; errors are logged and reported as `false`.
    pub fn run(
        &self,
        db: &Database,
        force: bool,
        unclean_shutdown: bool,
        progress: &mut dyn FnMut(&str),
    ) -> bool {
        match self.run_report(db, force, unclean_shutdown, progress) {
            Ok(report) => report.success(),
            Err(err) => {
                warn!(error = %err, "maintenance aborted");
                false
            }
        }
    }

    fn run_checks(
        &self,
        db: &Database,
        trigger: MaintenanceTrigger,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<MaintenanceReport> {
        info!(?trigger, checks = self.checks.len(), "maintenance started");
        let mut txn = db.begin()?;
        let mut report = CheckReport::default();
        let total = self.checks.len();

        for (i, check) in self.checks.iter().enumerate() {
            progress(&format!("Checking data ({} of {}): {}", i + 1, total, check.name()));
            report.begin_check(check.name());
            check.check(&mut txn, &mut report)?;
        }

        for finding in report.findings() {
            if finding.is_unrepairable() {
                warn!(%finding, "maintenance finding");
            } else {
                info!(%finding, "maintenance finding");
            }
        }

        let mut result = MaintenanceReport {
            trigger: Some(trigger),
            checks_run: total,
            findings: report.findings,
            committed: false,
        };

        if result.unrepairable() > 0 {
            txn.abort();
            warn!(unrepairable = result.unrepairable(), "maintenance failed, nothing committed");
            return Ok(result);
        }

        if txn.contains(keys::FSCK_REQUESTED)? {
            txn.delete(keys::FSCK_REQUESTED)?;
        }
        txn.commit()?;
        result.committed = true;
        info!(repaired = result.repaired(), "maintenance complete");
        Ok(result)
    }
}

impl Default for MaintenanceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MaintenanceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceEngine")
            .field("checks", &self.check_names())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Clears the running flag when a pass ends, including by panic.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Decodes `key` if present. `Err` carries the codec message.
fn probe<T: DeserializeOwned>(txn: &Transaction, key: &[u8]) -> CoreResult<Option<Result<T, String>>> {
    Ok(txn
        .get(key)?
        .map(|bytes| keys::decode::<T>(&bytes).map_err(|e| e.to_string())))
}

/// The protocol version is present, decodable and not newer than this build.
struct ProtocolVersionCheck {
    current_version: u32,
}

impl IntegrityCheck for ProtocolVersionCheck {
    fn name(&self) -> &str {
        "protocol version"
    }

    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()> {
        match probe::<u32>(txn, keys::PROTOCOL_VERSION)? {
            None => report.unrepairable("protocol version record missing"),
            Some(Err(e)) => report.unrepairable(format!("protocol version undecodable: {e}")),
            Some(Ok(v)) if v > self.current_version => report.unrepairable(format!(
                "protocol version {v} is newer than {}",
                self.current_version
            )),
            Some(Ok(_)) => {}
        }
        Ok(())
    }
}

/// The op-id counter, when present, is decodable and at least 1.
///
/// Never repaired: any guess could hand out an id that was already used.
struct OpIdCheck;

impl IntegrityCheck for OpIdCheck {
    fn name(&self) -> &str {
        "operation ids"
    }

    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()> {
        match probe::<i64>(txn, keys::NEXT_OP_ID)? {
            Some(Err(e)) => report.unrepairable(format!("op id counter undecodable: {e}")),
            Some(Ok(v)) if v < 1 => report.unrepairable(format!("op id counter holds {v}")),
            _ => {}
        }
        Ok(())
    }
}

/// The auth record decodes; otherwise it is reset to logged out.
struct AuthCheck;

impl IntegrityCheck for AuthCheck {
    fn name(&self) -> &str {
        "auth metadata"
    }

    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()> {
        if let Some(Err(e)) = probe::<AuthMetadata>(txn, keys::AUTH_METADATA)? {
            keys::put_record(txn, keys::AUTH_METADATA, &AuthMetadata::default())?;
            report.repaired(format!("auth record undecodable ({e}), reset to logged out"));
        }
        Ok(())
    }
}

/// The device UUID parses; otherwise it is deleted and regenerated on the
/// next open.
struct DeviceUuidCheck;

impl IntegrityCheck for DeviceUuidCheck {
    fn name(&self) -> &str {
        "device uuid"
    }

    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()> {
        let problem = match probe::<String>(txn, keys::DEVICE_UUID)? {
            None => None,
            Some(Err(e)) => Some(format!("undecodable ({e})")),
            Some(Ok(s)) => Uuid::parse_str(&s)
                .err()
                .map(|e| format!("{s:?} is not a uuid ({e})")),
        };
        if let Some(problem) = problem {
            txn.delete(keys::DEVICE_UUID)?;
            report.repaired(format!("device uuid {problem}, deleted"));
        }
        Ok(())
    }
}

/// Preferences and the system message decode; broken ones are deleted so
/// defaults apply.
struct SettingsCheck;

impl SettingsCheck {
    fn repair<T: DeserializeOwned>(
        txn: &mut Transaction,
        report: &mut CheckReport,
        key: &[u8],
    ) -> CoreResult<()> {
        if let Some(Err(e)) = probe::<T>(txn, key)? {
            txn.delete(key)?;
            report.repaired(format!(
                "{} undecodable ({e}), deleted",
                String::from_utf8_lossy(key)
            ));
        }
        Ok(())
    }
}

impl IntegrityCheck for SettingsCheck {
    fn name(&self) -> &str {
        "settings"
    }

    fn check(&self, txn: &mut Transaction, report: &mut CheckReport) -> CoreResult<()> {
        for key in BOOL_KEYS {
            Self::repair::<bool>(txn, report, key)?;
        }
        Self::repair::<f64>(txn, report, keys::LAST_LOGIN_TIMESTAMP)?;
        Self::repair::<RegistrationVersion>(txn, report, keys::REGISTRATION_VERSION)?;
        Self::repair::<SystemMessage>(txn, report, keys::SYSTEM_MESSAGE)?;
        Ok(())
    }
}
