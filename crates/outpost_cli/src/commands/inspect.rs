//! Inspect command implementation.

use outpost_core::migration::stored_version;
use outpost_core::{keys, Database, ProtocolVersion};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database directory.
    pub path: String,
    /// Stored protocol version, `None` for a store never opened by a client.
    pub protocol_version: Option<u32>,
    /// Protocol version of this build.
    pub current_version: u32,
    /// Last committed sequence.
    pub committed_seq: u64,
    /// Sequence of the loaded checkpoint image.
    pub checkpoint_seq: Option<u64>,
    /// Batches replayed from the WAL at open.
    pub batches_replayed: usize,
    /// WAL size in bytes.
    pub wal_size: u64,
    /// Number of live keys.
    pub key_count: usize,
    /// Next local operation id the client will hand out.
    pub next_op_id: Option<i64>,
    /// A migration asked for a maintenance pass.
    pub fsck_requested: bool,
    /// The last session did not close cleanly.
    pub open_session: bool,
    /// Registered user id, 0 if not registered.
    pub user_id: i64,
}

/// Runs the inspect command.
pub fn run(base: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = super::open_store(base)?;
    let result = inspect(&db)?;
    db.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

/// Collects statistics from an open store.
pub fn inspect(db: &Database) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let stats = db.recovery_stats();
    let user_id = match keys::get_record::<outpost_core::AuthMetadata>(db, keys::AUTH_METADATA) {
        Ok(auth) => auth.map_or(0, |a| a.user_id),
        Err(_) => -1,
    };

    Ok(InspectResult {
        path: db
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        protocol_version: stored_version(db)?,
        current_version: ProtocolVersion::CURRENT.as_u32(),
        committed_seq: db.committed_seq().as_u64(),
        checkpoint_seq: stats.checkpoint_seq.map(|s| s.as_u64()),
        batches_replayed: stats.batches_replayed,
        wal_size: db.wal_size()?,
        key_count: db.len(),
        next_op_id: keys::get_record(db, keys::NEXT_OP_ID).ok().flatten(),
        fsck_requested: db.contains(keys::FSCK_REQUESTED)?,
        open_session: db.contains(keys::OPEN_SESSION)?,
        user_id,
    })
}

fn print_text(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    let version = result
        .protocol_version
        .and_then(ProtocolVersion::from_u32)
        .map_or_else(|| "none".to_string(), |v| v.to_string());
    println!("Protocol:");
    println!("  Stored:  {version}");
    println!("  Current: {}", ProtocolVersion::CURRENT);
    println!();
    println!("Storage:");
    println!("  Committed seq:    {}", result.committed_seq);
    match result.checkpoint_seq {
        Some(seq) => println!("  Checkpoint seq:   {seq}"),
        None => println!("  Checkpoint seq:   none"),
    }
    println!("  Batches replayed: {}", result.batches_replayed);
    println!("  WAL size:         {}", format_bytes(result.wal_size));
    println!("  Keys:             {}", result.key_count);
    println!();
    println!("State:");
    match result.next_op_id {
        Some(id) => println!("  Next op id:     {id}"),
        None => println!("  Next op id:     1 (unset)"),
    }
    println!("  FSCK requested: {}", result.fsck_requested);
    println!("  Open session:   {}", result.open_session);
    if result.user_id < 0 {
        println!("  User id:        unreadable");
    } else {
        println!("  User id:        {}", result.user_id);
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_fresh_store() {
        let db = Database::open_in_memory().unwrap();
        let result = inspect(&db).unwrap();
        assert_eq!(result.protocol_version, None);
        assert_eq!(result.key_count, 0);
        assert_eq!(result.user_id, 0);
        assert!(!result.open_session);
    }

    #[test]
    fn inspect_reports_markers() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|txn| {
            keys::put_record(txn, keys::PROTOCOL_VERSION, &25u32)?;
            keys::put_record(txn, keys::NEXT_OP_ID, &12i64)?;
            keys::put_record(txn, keys::FSCK_REQUESTED, &true)
        })
        .unwrap();

        let result = inspect(&db).unwrap();
        assert_eq!(result.protocol_version, Some(25));
        assert_eq!(result.next_op_id, Some(12));
        assert!(result.fsck_requested);
        assert_eq!(result.key_count, 3);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
    }
}
