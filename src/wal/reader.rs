//! WAL replay logic

use super::entry::{WalEntry, WalError};
use crate::storage::BlockStorage;

/// Result of scanning a log: the valid prefix and where it ends
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub entries: Vec<WalEntry>,
    /// Byte length of the valid prefix
    pub valid_len: usize,
    /// Highest sequence seen in the valid prefix (including skipped entries)
    pub last_sequence: u64,
}

/// Replay WAL entries from storage
pub async fn replay_wal(
    storage: &dyn BlockStorage,
    path: &str,
    after_sequence: u64,
) -> Result<ReplayOutcome, WalError> {
    if !storage.exists(path).await? {
        return Ok(ReplayOutcome::default());
    }

    let data = storage.read(path).await?;
    Ok(replay_from_bytes(&data, after_sequence))
}

/// Replay WAL entries from byte buffer
///
/// Stops at the first entry with a bad magic, a bad checksum, an undecodable
/// payload or a torn tail. Everything before that point is returned.
pub fn replay_from_bytes(data: &[u8], after_sequence: u64) -> ReplayOutcome {
    let mut outcome = ReplayOutcome::default();
    let mut offset = 0;

    while offset < data.len() {
        match WalEntry::deserialize(&data[offset..]) {
            Ok((entry, used)) => {
                outcome.last_sequence = outcome.last_sequence.max(entry.sequence);
                if entry.sequence > after_sequence {
                    outcome.entries.push(entry);
                }
                offset += used;
            }
            Err(WalError::InvalidMagic) => {
                // Zeros or garbage past the last entry
                break;
            }
            Err(WalError::TruncatedEntry) => {
                tracing::warn!(offset, "Torn WAL tail at offset {}, stopping replay", offset);
                break;
            }
            Err(e) => {
                tracing::warn!(
                    offset,
                    error = %e,
                    "WAL corruption detected at offset {}, stopping replay",
                    offset
                );
                break;
            }
        }
    }

    outcome.valid_len = offset;
    outcome
}
