//! Transaction log.
//!
//! Each committed transaction is a run of entries recording, per file node
//! list, the list's node count after the transaction, closed by a sentinel
//! entry. Only the first `c_transactions_in_log` transactions are committed;
//! anything after them is ignored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use onestore_types::{ByteCursor, ByteWriter};

use crate::chunk::ChunkReference;
use crate::config::DecodeConfig;
use crate::error::{FormatError, FormatResult};
use crate::quota::NodeQuotaTable;
use crate::source::ChunkSource;

/// Source id of the entry that closes a transaction.
pub const TRANSACTION_SENTINEL: u32 = 0x0000_0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Id of the file node list, or the sentinel.
    pub src_id: u32,
    /// New node count of the list; a checksum for the sentinel.
    pub switch: u32,
}

impl TransactionEntry {
    pub const SIZE: usize = 8;

    pub fn is_sentinel(&self) -> bool {
        self.src_id == TRANSACTION_SENTINEL
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogFragment {
    pub entries: Vec<TransactionEntry>,
    pub next_fragment: ChunkReference,
}

impl TransactionLogFragment {
    pub fn decode(bytes: &[u8], base: u64) -> FormatResult<Self> {
        if bytes.len() < ChunkReference::FIXED64X32_SIZE {
            return Err(FormatError::framing(
                base,
                format!(
                    "transaction log fragment of {} bytes has no room for its next reference",
                    bytes.len()
                ),
            ));
        }
        let mut cursor = ByteCursor::with_base(bytes, base);
        let count = (bytes.len() - ChunkReference::FIXED64X32_SIZE) / TransactionEntry::SIZE;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(TransactionEntry {
                src_id: cursor.read_u32()?,
                switch: cursor.read_u32()?,
            });
        }
        // Any bytes short of a whole entry are unused.
        let slack = cursor.remaining() - ChunkReference::FIXED64X32_SIZE;
        cursor.read_bytes(slack)?;
        let next_fragment = ChunkReference::read_fixed64x32(&mut cursor)?;
        Ok(Self { entries, next_fragment })
    }

    pub fn encode(&self) -> FormatResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        for entry in &self.entries {
            writer.put_u32(entry.src_id);
            writer.put_u32(entry.switch);
        }
        self.next_fragment.write(&mut writer)?;
        Ok(writer.into_inner())
    }
}

/// The committed transactions of a revision store file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    /// Entries of each committed transaction, sentinel excluded.
    pub transactions: Vec<Vec<TransactionEntry>>,
}

impl TransactionLog {
    /// Read `c_transactions` committed transactions starting at `first`.
    pub fn read<S: ChunkSource + ?Sized>(
        source: &S,
        first: &ChunkReference,
        c_transactions: u32,
        config: &DecodeConfig,
    ) -> FormatResult<Self> {
        let mut log = Self::default();
        if c_transactions == 0 {
            return Ok(log);
        }
        let mut reference = *first;
        let mut visited = HashSet::new();
        let mut current = Vec::new();
        loop {
            let location = reference.location();
            if visited.len() >= config.max_fragments || !visited.insert(location) {
                return Err(FormatError::framing(
                    location,
                    "transaction log chain does not terminate",
                ));
            }
            let bytes = source.fetch(&reference)?;
            let fragment = TransactionLogFragment::decode(&bytes, location)?;
            for entry in fragment.entries {
                if entry.is_sentinel() {
                    log.transactions.push(std::mem::take(&mut current));
                    if log.transactions.len() == c_transactions as usize {
                        debug!(transactions = c_transactions, "read transaction log");
                        return Ok(log);
                    }
                } else {
                    current.push(entry);
                }
            }
            let next = fragment.next_fragment;
            if next.is_nil() || next.is_zero() {
                return Err(FormatError::framing(
                    location,
                    format!(
                        "transaction log ends after {} of {c_transactions} transactions",
                        log.transactions.len()
                    ),
                ));
            }
            reference = next;
        }
    }

    /// Last recorded node count for `list_id`, if any.
    pub fn node_count(&self, list_id: u32) -> Option<u32> {
        self.transactions
            .iter()
            .flatten()
            .rev()
            .find(|e| e.src_id == list_id)
            .map(|e| e.switch)
    }
}

impl NodeQuotaTable {
    /// Limit each list to its last committed node count.
    pub fn from_transaction_log(log: &TransactionLog) -> Self {
        let mut table = Self::unbounded();
        for entry in log.transactions.iter().flatten() {
            table.set_limit(entry.src_id, entry.switch);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    fn entry(src_id: u32, switch: u32) -> TransactionEntry {
        TransactionEntry { src_id, switch }
    }

    #[test]
    fn fragment_roundtrip() {
        let frag = TransactionLogFragment {
            entries: vec![entry(0x10, 3), entry(1, 0xDEAD)],
            next_fragment: ChunkReference::nil_fixed64x32(),
        };
        let bytes = frag.encode().unwrap();
        assert_eq!(bytes.len(), 28);
        assert_eq!(TransactionLogFragment::decode(&bytes, 0).unwrap(), frag);
    }

    #[test]
    fn reads_committed_transactions_across_fragments() {
        let second = TransactionLogFragment {
            entries: vec![entry(0x10, 5), entry(1, 0), entry(0x10, 99), entry(1, 0)],
            next_fragment: ChunkReference::nil_fixed64x32(),
        }
        .encode()
        .unwrap();
        let first = TransactionLogFragment {
            entries: vec![entry(0x10, 2), entry(0x20, 7), entry(1, 0)],
            next_fragment: ChunkReference::Fixed64x32 { stp: 36, cb: second.len() as u32 },
        }
        .encode()
        .unwrap();
        assert_eq!(first.len(), 36);
        let mut store = first.clone();
        store.extend_from_slice(&second);
        let src = SliceSource::new(store);

        let log = TransactionLog::read(
            &src,
            &ChunkReference::Fixed64x32 { stp: 0, cb: 36 },
            2,
            &DecodeConfig::default(),
        )
        .unwrap();
        assert_eq!(log.transactions.len(), 2);
        // The third transaction is not committed.
        assert_eq!(log.node_count(0x10), Some(5));
        assert_eq!(log.node_count(0x20), Some(7));

        let quotas = NodeQuotaTable::from_transaction_log(&log);
        assert_eq!(quotas.limit(0x10), Some(5));
        assert_eq!(quotas.limit(0x30), None);
    }

    #[test]
    fn missing_transactions_is_framing_error() {
        let bytes = TransactionLogFragment {
            entries: vec![entry(0x10, 2), entry(1, 0)],
            next_fragment: ChunkReference::nil_fixed64x32(),
        }
        .encode()
        .unwrap();
        let len = bytes.len() as u32;
        let src = SliceSource::new(bytes);
        let err = TransactionLog::read(
            &src,
            &ChunkReference::Fixed64x32 { stp: 0, cb: len },
            3,
            &DecodeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::MalformedFraming { .. }));
    }
}
