//! Logical keys owned by the core and typed record helpers.
//!
//! Domain collaborators use their own prefixes; everything under `meta/`,
//! `auth/` and `settings/` belongs to the core.

use crate::error::{CoreError, CoreResult};
use crate::store::{DbRead, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Persisted protocol version.
pub const PROTOCOL_VERSION: &[u8] = b"meta/protocol_version";
/// Next local operation id to hand out.
pub const NEXT_OP_ID: &[u8] = b"meta/next_op_id";
/// Set when a migration asks for a maintenance pass.
pub const FSCK_REQUESTED: &[u8] = b"meta/fsck_requested";
/// Present while a session is open; found at open after a crash.
pub const OPEN_SESSION: &[u8] = b"meta/open_session";

/// User/device/cookie record.
pub const AUTH_METADATA: &[u8] = b"auth/metadata";
/// Device fingerprint the store was created with.
pub const DEVICE_UUID: &[u8] = b"auth/device_uuid";

/// Server-delivered system message.
pub const SYSTEM_MESSAGE: &[u8] = b"settings/system_message";
/// Whether originals are backed up to cloud storage.
pub const CLOUD_STORAGE: &[u8] = b"settings/cloud_storage";
/// Whether full-resolution originals are kept.
pub const STORE_ORIGINALS: &[u8] = b"settings/store_originals";
/// Set when the account has no password.
pub const NO_PASSWORD: &[u8] = b"settings/no_password";
/// Whether debug logs are uploaded.
pub const UPLOAD_LOGS: &[u8] = b"settings/upload_logs";
/// Set once the first full server refresh finished.
pub const REFRESH_COMPLETED: &[u8] = b"settings/refresh_completed";
/// Seconds since the epoch of the last login.
pub const LAST_LOGIN_TIMESTAMP: &[u8] = b"settings/last_login_timestamp";
/// Which sign-up flow this install uses.
pub const REGISTRATION_VERSION: &[u8] = b"settings/registration_version";

/// Prefix shared by every preference key.
pub const SETTINGS_PREFIX: &[u8] = b"settings/";

/// Encodes a typed record as CBOR.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
}

/// Reads and decodes the record under `key`.
///
/// # Errors
///
/// `Codec` if the stored bytes are not a valid `T`.
pub fn get_record<T: DeserializeOwned>(
    reader: &(impl DbRead + ?Sized),
    key: &[u8],
) -> CoreResult<Option<T>> {
    reader.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

/// Encodes `value` and buffers it under `key`.
pub fn put_record<T: Serialize>(txn: &mut Transaction, key: &[u8], value: &T) -> CoreResult<()> {
    txn.put(key, encode(value)?)
}
