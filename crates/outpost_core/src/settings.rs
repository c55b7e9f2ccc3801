//! Persisted preferences and the server system message.

use crate::database::Database;
use crate::error::CoreResult;
use crate::keys;
use crate::notify::NotificationHub;
use crate::store::{DbRead, Transaction};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How the account was registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationVersion {
    /// Registered through a Google or Facebook identity.
    #[default]
    GoogleFacebook,
    /// Registered with an email address.
    Email,
}

impl RegistrationVersion {
    /// The flow new registrations use.
    pub const CURRENT: Self = Self::Email;
}

/// Severity of a system message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Recorded but not shown.
    Silent,
    /// Informational.
    #[default]
    Info,
    /// Needs the user's attention.
    Attention,
    /// Network activity must stop until the message is cleared.
    DisableNetwork,
}

/// A message pushed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Server identifier; a message is shown once per identifier.
    pub identifier: String,
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Optional link.
    pub link: String,
    /// How loudly to show it.
    pub severity: Severity,
}

/// Cached preference values.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    /// The user's cloud-storage preference; check
    /// [`Platform::cloud_storage_enabled`](crate::Platform::cloud_storage_enabled)
    /// before acting on it.
    pub cloud_storage: bool,
    /// Upload full-resolution originals.
    pub store_originals: bool,
    /// The account has no password set.
    pub no_password: bool,
    /// Upload client logs.
    pub upload_logs: bool,
    /// A full refresh has completed since authentication.
    pub refresh_completed: bool,
    /// Last login, seconds since the Unix epoch.
    pub last_login_timestamp: f64,
    /// Registration flow of the account.
    pub registration_version: RegistrationVersion,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            cloud_storage: false,
            store_originals: false,
            no_password: false,
            upload_logs: false,
            refresh_completed: false,
            last_login_timestamp: 0.0,
            registration_version: RegistrationVersion::default(),
        }
    }
}

/// Settings downloaded from the server; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    /// Server value for cloud storage.
    pub cloud_storage: Option<bool>,
    /// Server value for storing originals.
    pub store_originals: Option<bool>,
    /// Server value for the no-password flag.
    pub no_password: Option<bool>,
}

/// Boolean preference keys, in the order they are listed.
pub(crate) const BOOL_KEYS: [&[u8]; 5] = [
    keys::CLOUD_STORAGE,
    keys::STORE_ORIGINALS,
    keys::NO_PASSWORD,
    keys::UPLOAD_LOGS,
    keys::REFRESH_COMPLETED,
];

/// Persisted preferences plus the system message.
///
/// Reads come from an in-memory cache loaded at open. Local setters publish
/// `settings_changed(false)`; [`apply_server_settings`](Self::apply_server_settings)
/// publishes `settings_changed(true)` so the change is not uploaded back.
#[derive(Debug)]
pub struct Settings {
    db: Arc<Database>,
    hub: Arc<NotificationHub>,
    prefs: RwLock<Preferences>,
    system_message: RwLock<Option<SystemMessage>>,
    account_setup: AtomicBool,
}

impl Settings {
    /// Loads preferences from `db`. Undecodable values fall back to defaults.
    #[must_use]
    pub fn load(db: Arc<Database>, hub: Arc<NotificationHub>) -> Self {
        let prefs = read_preferences(db.as_ref());
        let system_message = read_or_default(db.as_ref(), keys::SYSTEM_MESSAGE);
        Self {
            db,
            hub,
            prefs: RwLock::new(prefs),
            system_message: RwLock::new(system_message),
            account_setup: AtomicBool::new(false),
        }
    }

    /// Re-reads everything from the store.
    pub fn reload(&self) {
        *self.prefs.write() = read_preferences(self.db.as_ref());
        *self.system_message.write() = read_or_default(self.db.as_ref(), keys::SYSTEM_MESSAGE);
    }

    /// Returns a copy of every preference.
    #[must_use]
    pub fn preferences(&self) -> Preferences {
        self.prefs.read().clone()
    }

    /// Whether originals are backed up to cloud storage.
    #[must_use]
    pub fn cloud_storage(&self) -> bool {
        self.prefs.read().cloud_storage
    }

    /// Whether full-resolution originals are kept.
    #[must_use]
    pub fn store_originals(&self) -> bool {
        self.prefs.read().store_originals
    }

    /// True when the account has no password.
    #[must_use]
    pub fn no_password(&self) -> bool {
        self.prefs.read().no_password
    }

    /// Whether debug logs are uploaded.
    #[must_use]
    pub fn upload_logs(&self) -> bool {
        self.prefs.read().upload_logs
    }

    /// True once the first full refresh finished.
    #[must_use]
    pub fn refresh_completed(&self) -> bool {
        self.prefs.read().refresh_completed
    }

    /// Seconds since the epoch of the last login.
    #[must_use]
    pub fn last_login_timestamp(&self) -> f64 {
        self.prefs.read().last_login_timestamp
    }

    /// Sign-up flow this install uses.
    #[must_use]
    pub fn registration_version(&self) -> RegistrationVersion {
        self.prefs.read().registration_version
    }

    /// Persists the cloud storage preference.
    pub fn set_cloud_storage(&self, value: bool) -> CoreResult<()> {
        self.set(keys::CLOUD_STORAGE, &value, |p| p.cloud_storage = value)
    }

    /// Persists the store originals preference.
    pub fn set_store_originals(&self, value: bool) -> CoreResult<()> {
        self.set(keys::STORE_ORIGINALS, &value, |p| p.store_originals = value)
    }

    /// Persists the no-password flag.
    pub fn set_no_password(&self, value: bool) -> CoreResult<()> {
        self.set(keys::NO_PASSWORD, &value, |p| p.no_password = value)
    }

    /// Persists the log upload preference.
    pub fn set_upload_logs(&self, value: bool) -> CoreResult<()> {
        self.set(keys::UPLOAD_LOGS, &value, |p| p.upload_logs = value)
    }

    /// Records whether the first full refresh finished.
    pub fn set_refresh_completed(&self, value: bool) -> CoreResult<()> {
        self.set(keys::REFRESH_COMPLETED, &value, |p| p.refresh_completed = value)
    }

    /// Persists the last login time.
    pub fn set_last_login_timestamp(&self, value: f64) -> CoreResult<()> {
        self.set(keys::LAST_LOGIN_TIMESTAMP, &value, |p| {
            p.last_login_timestamp = value;
        })
    }

    /// Persists the sign-up flow.
    pub fn set_registration_version(&self, value: RegistrationVersion) -> CoreResult<()> {
        self.set(keys::REGISTRATION_VERSION, &value, |p| {
            p.registration_version = value;
        })
    }

    /// Whether account setup is in progress. Not persisted.
    #[must_use]
    pub fn account_setup(&self) -> bool {
        self.account_setup.load(Ordering::SeqCst)
    }

    /// Marks account setup as started or finished.
    pub fn set_account_setup(&self, value: bool) {
        self.account_setup.store(value, Ordering::SeqCst);
    }

    /// Applies server-provided values in one transaction and publishes
    /// `settings_changed(true)`.
    pub fn apply_server_settings(&self, update: &ServerSettings) -> CoreResult<()> {
        let mut prefs = self.prefs.write();
        let mut next = prefs.clone();
        let mut txn = self.db.begin()?;

        for (key, value, slot) in [
            (keys::CLOUD_STORAGE, update.cloud_storage, &mut next.cloud_storage),
            (keys::STORE_ORIGINALS, update.store_originals, &mut next.store_originals),
            (keys::NO_PASSWORD, update.no_password, &mut next.no_password),
        ] {
            if let Some(value) = value {
                keys::put_record(&mut txn, key, &value)?;
                *slot = value;
            }
        }

        txn.commit()?;
        *prefs = next;
        drop(prefs);

        debug!(?update, "applied server settings");
        self.hub.settings_changed().publish(&true);
        Ok(())
    }

    /// Returns the current system message, if any.
    #[must_use]
    pub fn system_message(&self) -> Option<SystemMessage> {
        self.system_message.read().clone()
    }

    /// Persists a system message and publishes `system_message_changed`.
    pub fn set_system_message(&self, message: SystemMessage) -> CoreResult<()> {
        let mut current = self.system_message.write();
        self.commit(|txn| keys::put_record(txn, keys::SYSTEM_MESSAGE, &message))?;
        *current = Some(message);
        drop(current);
        self.hub.system_message_changed().publish(&());
        Ok(())
    }

    /// Removes the system message and publishes `system_message_changed`.
    pub fn clear_system_message(&self) -> CoreResult<()> {
        let mut current = self.system_message.write();
        self.commit(|txn| txn.delete(keys::SYSTEM_MESSAGE))?;
        *current = None;
        drop(current);
        self.hub.system_message_changed().publish(&());
        Ok(())
    }

    fn set<T: Serialize>(
        &self,
        key: &[u8],
        value: &T,
        apply: impl FnOnce(&mut Preferences),
    ) -> CoreResult<()> {
        let mut prefs = self.prefs.write();
        self.commit(|txn| keys::put_record(txn, key, value))?;
        apply(&mut *prefs);
        drop(prefs);
        self.hub.settings_changed().publish(&false);
        Ok(())
    }

    fn commit(&self, write: impl FnOnce(&mut Transaction) -> CoreResult<()>) -> CoreResult<()> {
        let mut txn = self.db.begin()?;
        write(&mut txn)?;
        txn.commit()?;
        Ok(())
    }
}

fn read_or_default<T>(reader: &dyn DbRead, key: &[u8]) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    match keys::get_record::<T>(reader, key) {
        Ok(value) => value.unwrap_or_default(),
        Err(err) => {
            warn!(key = %String::from_utf8_lossy(key), error = %err, "unreadable setting, using default");
            T::default()
        }
    }
}

fn read_preferences(reader: &dyn DbRead) -> Preferences {
    Preferences {
        cloud_storage: read_or_default(reader, keys::CLOUD_STORAGE),
        store_originals: read_or_default(reader, keys::STORE_ORIGINALS),
        no_password: read_or_default(reader, keys::NO_PASSWORD),
        upload_logs: read_or_default(reader, keys::UPLOAD_LOGS),
        refresh_completed: read_or_default(reader, keys::REFRESH_COMPLETED),
        last_login_timestamp: read_or_default(reader, keys::LAST_LOGIN_TIMESTAMP),
        registration_version: read_or_default(reader, keys::REGISTRATION_VERSION),
    }
}
