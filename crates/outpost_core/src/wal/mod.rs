//! Write-ahead log of committed batches.
//!
//! Every commit is one `Batch` record. The batch is appended and flushed
//! before its writes become visible, so a commit that returned `Ok` is
//! replayed on the next open.
//!
//! ## Record Format
//!
//! ```text
//! | magic "OWAL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as a clean end of log, the tail is truncated away):
//!
//! - fewer than 11 header bytes at the end
//! - a length field pointing past the end, with no complete record after it
//!
//! These are crashes mid-append; the torn batch was never acknowledged.
//! A length that overruns a later CRC-valid record is damage, not a tear.
//!
//! Fatal (`open` fails):
//!
//! - CRC mismatch, bad magic, unknown record type, future version
//! - a length field that overruns a later complete record
//!
//! These are real corruption; the host decides between FSCK and reset.

mod record;
mod writer;

pub(crate) use record::ByteReader;
pub use record::{decode_log, DecodedLog, WalRecord, WalRecordType, WAL_HEADER_SIZE};
pub use writer::WalManager;
