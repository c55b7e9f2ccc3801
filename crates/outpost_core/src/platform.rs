//! Host platform capabilities.

use crate::error::CoreResult;
use crate::maintenance::IntegrityCheck;
use crate::migration::MigrationManager;
use crate::settings::Settings;
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// How the host wants the context initialised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitAction {
    /// Open, migrate, and run maintenance only if something triggers it.
    #[default]
    Normal,
    /// Open, migrate, and force a maintenance pass.
    Fsck,
    /// Wipe the database and start over; forces a full resync.
    Reset,
}

/// What the core needs from the platform it runs on.
///
/// Platform builds override what they support; everything has a headless
/// default except the values only the platform can know.
pub trait Platform: Send + Sync {
    /// Initialisation mode requested by the user or the launch environment.
    fn init_action(&self) -> InitAction {
        InitAction::Normal
    }

    /// True if cloud storage is both preferred and covered by the user's
    /// subscription.
    fn cloud_storage_enabled(&self, settings: &Settings) -> bool {
        settings.cloud_storage()
    }

    /// Deletes a platform asset (e.g. a photo-library entry).
    fn delete_asset(&self, key: &str) -> CoreResult<()>;

    /// Name of the local time zone.
    fn timezone(&self) -> String;

    /// Seconds east of UTC for the local zone at wall time `at`.
    fn timezone_offset(&self, at: f64) -> i32;

    /// Stable fingerprint of this physical device.
    fn device_fingerprint(&self) -> String;

    /// True if the current network is Wi-Fi.
    fn network_wifi(&self) -> bool {
        false
    }

    /// Installs the platform's migrations over the version markers.
    fn register_migrations(&self, _manager: &mut MigrationManager) -> CoreResult<()> {
        Ok(())
    }

    /// Integrity checks for the platform's own tables.
    fn integrity_checks(&self) -> Vec<Box<dyn IntegrityCheck>> {
        Vec::new()
    }
}

/// Platform for the CLI and tests: UTC, no assets, fixed fingerprint.
pub struct HeadlessPlatform {
    fingerprint: String,
    timezone: String,
    offset_secs: i32,
    init_action: InitAction,
    deleted_assets: Mutex<Vec<String>>,
}

impl HeadlessPlatform {
    /// Creates a platform with a random fingerprint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fingerprint(Uuid::new_v4().to_string())
    }

    /// Creates a platform with the given fingerprint.
    #[must_use]
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            timezone: "UTC".to_string(),
            offset_secs: 0,
            init_action: InitAction::Normal,
            deleted_assets: Mutex::new(Vec::new()),
        }
    }

    /// Sets the reported time zone.
    #[must_use]
    pub fn timezone_name(mut self, name: impl Into<String>, offset_secs: i32) -> Self {
        self.timezone = name.into();
        self.offset_secs = offset_secs;
        self
    }

    /// Sets the reported init action.
    #[must_use]
    pub fn init_action_override(mut self, action: InitAction) -> Self {
        self.init_action = action;
        self
    }

    /// Returns the keys passed to [`Platform::delete_asset`].
    #[must_use]
    pub fn deleted_assets(&self) -> Vec<String> {
        self.deleted_assets.lock().clone()
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HeadlessPlatform {
    fn init_action(&self) -> InitAction {
        self.init_action
    }

    fn delete_asset(&self, key: &str) -> CoreResult<()> {
        debug!(key, "headless platform dropping asset");
        self.deleted_assets.lock().push(key.to_string());
        Ok(())
    }

    fn timezone(&self) -> String {
        self.timezone.clone()
    }

    fn timezone_offset(&self, _at: f64) -> i32 {
        self.offset_secs
    }

    fn device_fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}

impl fmt::Debug for HeadlessPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessPlatform")
            .field("fingerprint", &self.fingerprint)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}
