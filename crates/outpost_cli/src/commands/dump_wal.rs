//! Dump-WAL command implementation.

use outpost_core::wal::{decode_log, WalRecord};
use outpost_core::{AppDirs, WriteOp};
use outpost_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// One WAL record, flattened for printing.
#[derive(Debug, Serialize)]
pub struct RecordDump {
    /// Byte offset in the log.
    pub offset: u64,
    /// `batch` or `checkpoint`.
    pub kind: &'static str,
    /// Commit sequence.
    pub sequence: u64,
    /// Transaction id, batches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Operations, batches only.
    pub ops: Vec<String>,
}

/// Runs the dump-wal command. Reads the file directly, so it works while
/// a client holds the store.
pub fn run(base: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let wal_path = AppDirs::new(base).database.join("wal.log");
    if !wal_path.exists() {
        return Err(format!("No WAL found at {}", wal_path.display()).into());
    }

    let backend = FileBackend::open(&wal_path)?;
    let data = backend.read_all()?;
    let records = dump(&data, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            println!("WAL: {} ({} bytes)", wal_path.display(), data.len());
            for record in &records {
                match record.txid {
                    Some(txid) => println!(
                        "@{:>8}  {:<10} seq={} txid={}",
                        record.offset, record.kind, record.sequence, txid
                    ),
                    None => println!("@{:>8}  {:<10} seq={}", record.offset, record.kind, record.sequence),
                }
                for op in &record.ops {
                    println!("            {op}");
                }
            }
            println!("{} record(s)", records.len());
        }
    }
    Ok(())
}

/// Decodes up to `limit` records from a WAL image.
pub fn dump(data: &[u8], limit: Option<usize>) -> Result<Vec<RecordDump>, Box<dyn std::error::Error>> {
    let log = decode_log(data)?;
    if log.valid_len < data.len() as u64 {
        println!(
            "warning: {} trailing byte(s) are a torn record",
            data.len() as u64 - log.valid_len
        );
    }

    Ok(log
        .records
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, record)| match record {
            WalRecord::Batch {
                txid,
                sequence,
                ops,
            } => RecordDump {
                offset,
                kind: "batch",
                sequence: sequence.as_u64(),
                txid: Some(txid.as_u64()),
                ops: ops.iter().map(describe).collect(),
            },
            WalRecord::Checkpoint { sequence } => RecordDump {
                offset,
                kind: "checkpoint",
                sequence: sequence.as_u64(),
                txid: None,
                ops: Vec::new(),
            },
        })
        .collect())
}

fn describe(op: &WriteOp) -> String {
    match op {
        WriteOp::Put { key, value } => {
            format!("put {} ({} bytes)", String::from_utf8_lossy(key), value.len())
        }
        WriteOp::Delete { key } => format!("del {}", String::from_utf8_lossy(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{SequenceNumber, TransactionId};

    fn batch(seq: u64) -> WalRecord {
        WalRecord::Batch {
            txid: TransactionId::new(seq),
            sequence: SequenceNumber::new(seq),
            ops: vec![
                WriteOp::Put {
                    key: b"next_op_id".to_vec(),
                    value: vec![1, 2],
                },
                WriteOp::Delete {
                    key: b"open_session".to_vec(),
                },
            ],
        }
    }

    #[test]
    fn dump_respects_limit() {
        let mut data = Vec::new();
        for seq in 1..=3 {
            data.extend(batch(seq).encode().unwrap());
        }
        let records = dump(&data, Some(2)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sequence, 2);
        assert_eq!(records[0].ops, vec!["put next_op_id (2 bytes)", "del open_session"]);
    }

    #[test]
    fn dump_tolerates_torn_tail() {
        let mut data = batch(1).encode().unwrap();
        data.extend_from_slice(&batch(2).encode().unwrap()[..6]);
        let records = dump(&data, None).unwrap();
        assert_eq!(records.len(), 1);
    }
}
