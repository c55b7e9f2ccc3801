//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{SequenceNumber, TransactionId, WriteOp};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"OWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const WAL_HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// One committed transaction.
    Batch = 1,
    /// Everything up to a sequence lives in the checkpoint image.
    Checkpoint = 2,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Batch),
            2 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// All writes of one committed transaction, in the order they were made.
    Batch {
        /// Transaction that produced the batch.
        txid: TransactionId,
        /// Commit sequence assigned to the batch.
        sequence: SequenceNumber,
        /// Writes, last write to a key wins.
        ops: Vec<WriteOp>,
    },

    /// Checkpoint marker.
    Checkpoint {
        /// Sequence captured by the checkpoint image.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Batch { .. } => WalRecordType::Batch,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the commit sequence this record carries.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            Self::Batch { sequence, .. } | Self::Checkpoint { sequence } => *sequence,
        }
    }

    /// Encodes the record with its envelope and CRC.
    ///
    /// # Errors
    ///
    /// Fails if a key, value or the whole payload exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(WAL_HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Batch {
                txid,
                sequence,
                ops,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
                put_len(&mut buf, ops.len())?;
                for op in ops {
                    match op {
                        WriteOp::Put { key, value } => {
                            buf.push(OP_PUT);
                            put_bytes(&mut buf, key)?;
                            put_bytes(&mut buf, value)?;
                        }
                        WriteOp::Delete { key } => {
                            buf.push(OP_DELETE);
                            put_bytes(&mut buf, key)?;
                        }
                    }
                }
            }
            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = ByteReader::new(payload);
        let record = match record_type {
            WalRecordType::Batch => {
                let txid = TransactionId::new(reader.u64()?);
                let sequence = SequenceNumber::new(reader.u64()?);
                let count = reader.u32()? as usize;
                let mut ops = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let op = match reader.u8()? {
                        OP_PUT => WriteOp::Put {
                            key: reader.bytes()?,
                            value: reader.bytes()?,
                        },
                        OP_DELETE => WriteOp::Delete {
                            key: reader.bytes()?,
                        },
                        other => {
                            return Err(CoreError::store_corruption(format!(
                                "unknown batch op tag {other}"
                            )))
                        }
                    };
                    ops.push(op);
                }
                Self::Batch {
                    txid,
                    sequence,
                    ops,
                }
            }
            WalRecordType::Checkpoint => Self::Checkpoint {
                sequence: SequenceNumber::new(reader.u64()?),
            },
        };
        reader.finish()?;
        Ok(record)
    }
}

/// Result of scanning a WAL image.
#[derive(Debug, Default)]
pub struct DecodedLog {
    /// Complete records with their offsets.
    pub records: Vec<(u64, WalRecord)>,
    /// Length of the well-formed prefix; anything after it is a torn tail.
    pub valid_len: u64,
}

/// Decodes a whole WAL image under the recovery policy in [`crate::wal`].
///
/// # Errors
///
/// Returns `StoreCorruption` or `ChecksumMismatch` for fatal conditions.
pub fn decode_log(data: &[u8]) -> CoreResult<DecodedLog> {
    let mut log = DecodedLog::default();
    let mut offset = 0usize;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < WAL_HEADER_SIZE {
            break;
        }

        if rest[0..4] != WAL_MAGIC {
            return Err(CoreError::store_corruption(format!(
                "invalid WAL magic at offset {offset}"
            )));
        }

        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::store_corruption(format!(
                "unsupported WAL version {version} at offset {offset}"
            )));
        }

        let record_type = WalRecordType::from_byte(rest[6]).ok_or_else(|| {
            CoreError::store_corruption(format!(
                "unknown WAL record type {} at offset {offset}",
                rest[6]
            ))
        })?;

        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let total = WAL_HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            if let Some(at) = find_complete_record(&rest[1..]) {
                return Err(CoreError::store_corruption(format!(
                    "WAL length at offset {offset} overruns a complete record at offset {}",
                    offset + 1 + at
                )));
            }
            break;
        }

        let body_end = WAL_HEADER_SIZE + len;
        let expected = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let actual = crc32fast::hash(&rest[..body_end]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, &rest[WAL_HEADER_SIZE..body_end])?;
        log.records.push((offset as u64, record));
        offset += total;
        log.valid_len = offset as u64;
    }

    Ok(log)
}

/// Returns the position of the first CRC-valid record in `data`.
///
/// A crash mid-append leaves nothing complete after the torn record, so a
/// hit here means the length field itself is damaged.
fn find_complete_record(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(WAL_HEADER_SIZE + CRC_SIZE - 1))
        .find(|&at| is_complete_record(&data[at..]))
}

fn is_complete_record(rest: &[u8]) -> bool {
    if rest.len() < WAL_HEADER_SIZE
        || rest[0..4] != WAL_MAGIC
        || WalRecordType::from_byte(rest[6]).is_none()
    {
        return false;
    }
    let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
    let body_end = WAL_HEADER_SIZE + len;
    let Some(crc) = rest.get(body_end..body_end + CRC_SIZE) else {
        return false;
    };
    u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) == crc32fast::hash(&rest[..body_end])
}

fn put_len(buf: &mut Vec<u8>, len: usize) -> CoreResult<()> {
    let len = u32::try_from(len)
        .map_err(|_| CoreError::invalid_operation("WAL field exceeds u32::MAX bytes"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    put_len(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Little-endian cursor shared by the WAL and checkpoint decoders.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| CoreError::store_corruption("record shorter than its fields"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub(crate) fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn finish(&self) -> CoreResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(CoreError::store_corruption("trailing bytes after record"))
        }
    }
}
