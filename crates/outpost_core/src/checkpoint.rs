//! Checkpoint image: every live key/value at one commit sequence.
//!
//! ```text
//! | magic "OCKP" (4) | version (2) | sequence (8) | count (8) |
//! | { key_len (4) | key | value_len (4) | value } * count | crc32 (4) |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use crate::wal::ByteReader;

/// Magic bytes for the checkpoint image.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"OCKP";

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// A decoded checkpoint image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointImage {
    /// Last commit folded into the image.
    pub sequence: SequenceNumber,
    /// Live entries in key order.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl CheckpointImage {
    /// Encodes the image.
    ///
    /// # Errors
    ///
    /// Fails if a key or value exceeds `u32::MAX` bytes.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());

        for (key, value) in &self.entries {
            for field in [key, value] {
                let len = u32::try_from(field.len()).map_err(|_| {
                    CoreError::invalid_operation("checkpoint entry exceeds u32::MAX bytes")
                })?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(field);
            }
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes and verifies an image.
    ///
    /// # Errors
    ///
    /// Any framing problem or checksum mismatch is fatal; a checkpoint is
    /// written atomically so it is never legitimately torn.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 + 2 + 8 + 8 + 4 {
            return Err(CoreError::store_corruption("checkpoint image too short"));
        }
        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        if body[0..4] != CHECKPOINT_MAGIC {
            return Err(CoreError::store_corruption("invalid checkpoint magic"));
        }

        let mut reader = ByteReader::new(&body[4..]);
        let version = reader.u16()?;
        if version > CHECKPOINT_VERSION {
            return Err(CoreError::store_corruption(format!(
                "unsupported checkpoint version {version}"
            )));
        }
        let sequence = SequenceNumber::new(reader.u64()?);
        let count = reader.u64()?;

        let mut entries = Vec::new();
        for _ in 0..count {
            let key = reader.bytes()?;
            let value = reader.bytes()?;
            entries.push((key, value));
        }
        reader.finish()?;

        Ok(Self { sequence, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> CheckpointImage {
        CheckpointImage {
            sequence: SequenceNumber::new(12),
            entries: vec![
                (b"auth/device_uuid".to_vec(), b"abc".to_vec()),
                (b"meta/protocol_version".to_vec(), vec![0x18, 25]),
            ],
        }
    }

    #[test]
    fn image_decodes_to_itself() {
        let encoded = image().encode().unwrap();
        assert_eq!(CheckpointImage::decode(&encoded).unwrap(), image());
    }

    #[test]
    fn empty_image() {
        let empty = CheckpointImage {
            sequence: SequenceNumber::new(0),
            entries: Vec::new(),
        };
        let decoded = CheckpointImage::decode(&empty.encode().unwrap()).unwrap();
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn flipped_bit_detected() {
        let mut encoded = image().encode().unwrap();
        encoded[20] ^= 0x01;
        assert!(matches!(
            CheckpointImage::decode(&encoded),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_image_rejected() {
        let encoded = image().encode().unwrap();
        assert!(CheckpointImage::decode(&encoded[..10]).is_err());
    }
}
