//! Identity and device metadata.

use crate::database::Database;
use crate::error::CoreResult;
use crate::keys;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The device's registration state, persisted as one record.
///
/// `user_id == 0` means unauthenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMetadata {
    /// Server-assigned user id.
    pub user_id: i64,
    /// Server-assigned device id.
    pub device_id: i64,
    /// Session cookie.
    pub user_cookie: String,
    /// Anti-forgery cookie.
    pub xsrf_cookie: String,
}

/// Owner of the auth record and the device UUID.
///
/// Every mutation persists first and updates the cached copy only after the
/// commit succeeds. Mutations are serialised by one mutex.
#[derive(Debug)]
pub struct IdentityStore {
    db: Arc<Database>,
    auth: Mutex<AuthMetadata>,
    device_uuid: RwLock<String>,
    local_fingerprint: String,
    fake_logout: AtomicBool,
}

impl IdentityStore {
    /// Loads identity state from `db`.
    ///
    /// On a fresh store `local_fingerprint` becomes the persisted device
    /// UUID. An undecodable auth record loads as unauthenticated; the
    /// maintenance pass repairs it.
    pub fn load(db: Arc<Database>, local_fingerprint: impl Into<String>) -> CoreResult<Self> {
        let local_fingerprint = local_fingerprint.into();
        let auth = read_auth(db.as_ref());

        let device_uuid = resolve_device_uuid(db.as_ref(), &local_fingerprint)?;

        Ok(Self {
            db,
            auth: Mutex::new(auth),
            device_uuid: RwLock::new(device_uuid),
            local_fingerprint,
            fake_logout: AtomicBool::new(false),
        })
    }

    /// Re-reads the persisted state, e.g. after maintenance repaired it.
    pub fn reload(&self) -> CoreResult<()> {
        let mut auth = self.auth.lock();
        *auth = read_auth(self.db.as_ref());
        *self.device_uuid.write() = resolve_device_uuid(self.db.as_ref(), &self.local_fingerprint)?;
        Ok(())
    }

    /// Returns a copy of the auth record.
    #[must_use]
    pub fn auth(&self) -> AuthMetadata {
        self.auth.lock().clone()
    }

    /// Returns the server-assigned user id (0 when unauthenticated).
    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.auth.lock().user_id
    }

    /// Returns the server-assigned device id.
    #[must_use]
    pub fn device_id(&self) -> i64 {
        self.auth.lock().device_id
    }

    /// Returns the persisted device UUID.
    #[must_use]
    pub fn device_uuid(&self) -> String {
        self.device_uuid.read().clone()
    }

    /// True when a user id is persisted and no fake logout is active.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        !self.fake_logout.load(Ordering::SeqCst) && self.user_id() != 0
    }

    /// Makes [`is_registered`](Self::is_registered) report false without
    /// touching the persisted record.
    pub fn set_fake_logout(&self, value: bool) {
        self.fake_logout.store(value, Ordering::SeqCst);
    }

    /// Returns the fake logout override.
    #[must_use]
    pub fn fake_logout(&self) -> bool {
        self.fake_logout.load(Ordering::SeqCst)
    }

    /// True when the persisted device UUID no longer matches this device's
    /// fingerprint, e.g. after a restore onto new hardware. The backend then
    /// has to mint a new device id.
    #[must_use]
    pub fn needs_device_id_reset(&self) -> bool {
        *self.device_uuid.read() != self.local_fingerprint
    }

    /// Persists both ids in one transaction.
    pub fn set_user_and_device(&self, user_id: i64, device_id: i64) -> CoreResult<()> {
        self.update(|auth| {
            auth.user_id = user_id;
            auth.device_id = device_id;
        })
    }

    /// Sets the user id, keeping the current device id.
    ///
    /// The read of the device id and the write are one atomic step, but two
    /// calls to the single-field setters are not.
    pub fn set_user_id(&self, user_id: i64) -> CoreResult<()> {
        self.update(|auth| auth.user_id = user_id)
    }

    /// Sets the device id, keeping the current user id.
    pub fn set_device_id(&self, device_id: i64) -> CoreResult<()> {
        self.update(|auth| auth.device_id = device_id)
    }

    /// Persists session cookies.
    pub fn set_auth_cookies(
        &self,
        user_cookie: impl Into<String>,
        xsrf_cookie: impl Into<String>,
    ) -> CoreResult<()> {
        let (user_cookie, xsrf_cookie) = (user_cookie.into(), xsrf_cookie.into());
        self.update(|auth| {
            auth.user_cookie = user_cookie;
            auth.xsrf_cookie = xsrf_cookie;
        })
    }

    /// Resets ids and cookies to the unauthenticated state.
    ///
    /// The device UUID is left alone; it identifies the device, not the
    /// session.
    pub fn clear_auth_metadata(&self) -> CoreResult<()> {
        self.update(|auth| *auth = AuthMetadata::default())?;
        info!("cleared auth metadata");
        Ok(())
    }

    /// Persists `mutate(current)` and then swaps it into the cache.
    fn update(&self, mutate: impl FnOnce(&mut AuthMetadata)) -> CoreResult<()> {
        let mut cached = self.auth.lock();
        let mut next = cached.clone();
        mutate(&mut next);

        let mut txn = self.db.begin()?;
        keys::put_record(&mut txn, keys::AUTH_METADATA, &next)?;
        txn.commit()?;

        *cached = next;
        Ok(())
    }
}

fn read_auth(db: &Database) -> AuthMetadata {
    match keys::get_record::<AuthMetadata>(db, keys::AUTH_METADATA) {
        Ok(auth) => auth.unwrap_or_default(),
        Err(err) => {
            warn!(error = %err, "unreadable auth metadata, treating as logged out");
            AuthMetadata::default()
        }
    }
}

/// Reads the device UUID, recording `fingerprint` if none is stored.
/// An unreadable record yields an empty UUID until maintenance removes it.
fn resolve_device_uuid(db: &Database, fingerprint: &str) -> CoreResult<String> {
    match keys::get_record::<String>(db, keys::DEVICE_UUID) {
        Ok(Some(uuid)) => Ok(uuid),
        Ok(None) => {
            db.transaction(|txn| keys::put_record(txn, keys::DEVICE_UUID, &fingerprint))?;
            info!(device_uuid = %fingerprint, "recorded device uuid");
            Ok(fingerprint.to_string())
        }
        Err(err) => {
            warn!(error = %err, "unreadable device uuid");
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(fingerprint: &str) -> (Arc<Database>, IdentityStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let identity = IdentityStore::load(Arc::clone(&db), fingerprint).unwrap();
        (db, identity)
    }

    #[test]
    fn fresh_store_is_unregistered() {
        let (_db, identity) = store("uuid-a");
        assert!(!identity.is_registered());
        assert_eq!(identity.device_uuid(), "uuid-a");
        assert!(!identity.needs_device_id_reset());
    }

    #[test]
    fn set_user_and_device_persists_together() {
        let (db, identity) = store("uuid-a");
        identity.set_user_and_device(7, 11).unwrap();

        let stored: AuthMetadata = keys::get_record(db.as_ref(), keys::AUTH_METADATA)
            .unwrap()
            .unwrap();
        assert_eq!((stored.user_id, stored.device_id), (7, 11));
        assert!(identity.is_registered());
    }

    #[test]
    fn single_field_setters_keep_other_field() {
        let (_db, identity) = store("uuid-a");
        identity.set_user_and_device(1, 2).unwrap();
        identity.set_user_id(5).unwrap();
        identity.set_device_id(9).unwrap();
        assert_eq!((identity.user_id(), identity.device_id()), (5, 9));
    }

    #[test]
    fn logout_keeps_device_uuid() {
        let (db, identity) = store("uuid-a");
        identity.set_user_and_device(7, 11).unwrap();
        identity.set_auth_cookies("user", "xsrf").unwrap();

        identity.clear_auth_metadata().unwrap();

        assert_eq!(identity.auth(), AuthMetadata::default());
        assert!(!identity.is_registered());
        assert_eq!(identity.device_uuid(), "uuid-a");
        assert_eq!(
            keys::get_record::<String>(db.as_ref(), keys::DEVICE_UUID).unwrap(),
            Some("uuid-a".to_string())
        );
    }

    #[test]
    fn fake_logout_overrides_registration() {
        let (_db, identity) = store("uuid-a");
        identity.set_user_id(3).unwrap();
        identity.set_fake_logout(true);
        assert!(!identity.is_registered());
        identity.set_fake_logout(false);
        assert!(identity.is_registered());
    }

    #[test]
    fn changed_fingerprint_needs_reset() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        IdentityStore::load(Arc::clone(&db), "old-device").unwrap();
        let moved = IdentityStore::load(db, "new-device").unwrap();
        assert!(moved.needs_device_id_reset());
        assert_eq!(moved.device_uuid(), "old-device");
    }

    #[test]
    fn failed_commit_keeps_cached_state() {
        let (db, identity) = store("uuid-a");
        identity.set_user_id(4).unwrap();
        db.close().unwrap();
        assert!(identity.set_user_id(8).is_err());
        assert_eq!(identity.user_id(), 4);
    }

    #[test]
    fn garbage_auth_loads_as_logged_out() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.transaction(|txn| txn.put(keys::AUTH_METADATA, vec![0xff]))
            .unwrap();
        let identity = IdentityStore::load(db, "uuid-a").unwrap();
        assert_eq!(identity.user_id(), 0);
    }
}
