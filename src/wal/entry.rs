//! WAL entry format
//!
//! Binary format (all little-endian):
//! ┌────────┬────────┬──────────┬──────────┬─────────────────────┐
//! │ Magic  │ CRC32  │ SeqNo    │ Len      │ Payload (bincode)   │
//! │ 4 bytes│ 4 bytes│ 8 bytes  │ 4 bytes  │ Len bytes           │
//! └────────┴────────┴──────────┴──────────┴─────────────────────┘
//!
//! Total header: 20 bytes. The CRC covers everything after the CRC field.
//! One entry holds the whole effect of one mutating call, so a call is
//! either fully replayed or not at all.

use crate::defaults::{WAL_HEADER_SIZE, WAL_MAGIC};
use crate::storage::StorageError;
use crate::types::Record;
use serde::{Deserialize, Serialize};

/// Effect of one mutating call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    /// Post-images of every record written by the call
    Put(Vec<Record>),
    /// Ids removed by the call
    Remove(Vec<String>),
}

impl WalOp {
    /// Ids touched by this operation
    pub fn ids(&self) -> Vec<&str> {
        match self {
            WalOp::Put(records) => records.iter().map(|r| r.id.as_str()).collect(),
            WalOp::Remove(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// Parsed WAL entry
#[derive(Clone, Debug, PartialEq)]
pub struct WalEntry {
    pub sequence: u64,
    pub op: WalOp,
}

impl WalEntry {
    /// Serialize entry to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, WalError> {
        let payload =
            bincode::serialize(&self.op).map_err(|e| WalError::Payload(e.to_string()))?;
        let payload_len =
            u32::try_from(payload.len()).map_err(|_| WalError::EntryTooLarge(payload.len()))?;

        let mut buffer = vec![0u8; WAL_HEADER_SIZE];
        buffer[0..4].copy_from_slice(&WAL_MAGIC.to_le_bytes());
        // CRC (bytes 4..8) is filled once the body is complete
        buffer[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        buffer[16..20].copy_from_slice(&payload_len.to_le_bytes());
        buffer.extend_from_slice(&payload);

        let crc = crc32fast::hash(&buffer[8..]);
        buffer[4..8].copy_from_slice(&crc.to_le_bytes());

        Ok(buffer)
    }

    /// Deserialize one entry from the front of `data`
    ///
    /// Returns the entry and the number of bytes it occupied.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), WalError> {
        fn to_u32(data: &[u8], start: usize) -> Result<u32, WalError> {
            data.get(start..start + 4)
                .ok_or(WalError::TruncatedEntry)?
                .try_into()
                .map(u32::from_le_bytes)
                .map_err(|_| WalError::TruncatedEntry)
        }

        fn to_u64(data: &[u8], start: usize) -> Result<u64, WalError> {
            data.get(start..start + 8)
                .ok_or(WalError::TruncatedEntry)?
                .try_into()
                .map(u64::from_le_bytes)
                .map_err(|_| WalError::TruncatedEntry)
        }

        let magic = to_u32(data, 0)?;
        if magic != WAL_MAGIC {
            return Err(WalError::InvalidMagic);
        }
        if data.len() < WAL_HEADER_SIZE {
            return Err(WalError::TruncatedEntry);
        }

        let payload_len = to_u32(data, 16)? as usize;
        let total_len = WAL_HEADER_SIZE + payload_len;
        if data.len() < total_len {
            return Err(WalError::TruncatedEntry);
        }

        let stored_crc = to_u32(data, 4)?;
        let expected_crc = crc32fast::hash(&data[8..total_len]);
        if stored_crc != expected_crc {
            return Err(WalError::ChecksumMismatch);
        }

        let sequence = to_u64(data, 8)?;
        let op = bincode::deserialize(&data[WAL_HEADER_SIZE..total_len])
            .map_err(|e| WalError::Payload(e.to_string()))?;

        Ok((Self { sequence, op }, total_len))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("Invalid WAL magic number")]
    InvalidMagic,

    #[error("CRC checksum mismatch")]
    ChecksumMismatch,

    #[error("Truncated entry")]
    TruncatedEntry,

    #[error("WAL entry payload of {0} bytes exceeds the format limit")]
    EntryTooLarge(usize),

    #[error("Undecodable WAL payload: {0}")]
    Payload(String),

    #[error("WAL is unusable after a failed rollback; reopen the collection")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
