//! Global id tables: the GUID dictionary behind compact ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use onestore_types::{CompactId, ExtendedGuid};

use crate::error::{FormatError, FormatResult};
use crate::node::{FileNode, FileNodeBody};

/// Map from table index to GUID for one revision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdTable {
    entries: BTreeMap<u32, Uuid>,
}

impl GlobalIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u32, guid: Uuid) {
        self.entries.insert(index, guid);
    }

    /// Build a table from the entry nodes of a revision.
    ///
    /// Entries that copy or remap indexes read them from `previous`, the
    /// table of the revision this one depends on. A copy from a missing
    /// previous index is `UnresolvedCompactId`.
    pub fn build<'a>(
        nodes: impl IntoIterator<Item = &'a FileNode>,
        previous: Option<&GlobalIdTable>,
    ) -> FormatResult<Self> {
        let mut table = Self::new();
        let from_previous = |index: u32| -> FormatResult<Uuid> {
            previous.and_then(|p| p.get(index)).ok_or(FormatError::UnresolvedCompactId {
                id: CompactId::from_u32(index << 8),
            })
        };
        for node in nodes {
            match &node.body {
                FileNodeBody::GlobalIdTableEntry(e) => table.insert(e.index, e.guid),
                FileNodeBody::GlobalIdTableEntry2(e) => {
                    table.insert(e.index_map_to, from_previous(e.index_map_from)?);
                }
                FileNodeBody::GlobalIdTableEntry3(e) => {
                    for i in 0..e.entries_to_copy {
                        let guid = from_previous(e.index_copy_from_start.wrapping_add(i))?;
                        table.insert(e.index_copy_to_start.wrapping_add(i), guid);
                    }
                }
                _ => {}
            }
        }
        Ok(table)
    }

    pub fn get(&self, index: u32) -> Option<Uuid> {
        self.entries.get(&index).copied()
    }

    pub fn resolve(&self, id: CompactId) -> FormatResult<ExtendedGuid> {
        self.get(id.guid_index)
            .map(|guid| id.resolve_with(guid))
            .ok_or(FormatError::UnresolvedCompactId { id })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FileNodeId, GlobalIdTableEntry, GlobalIdTableEntry2, GlobalIdTableEntry3};

    fn entry(index: u32, guid: u128) -> FileNode {
        FileNode::new(
            FileNodeId::GLOBAL_ID_TABLE_ENTRY,
            FileNodeBody::GlobalIdTableEntry(GlobalIdTableEntry {
                index,
                guid: Uuid::from_u128(guid),
            }),
        )
        .unwrap()
    }

    #[test]
    fn resolves_compact_ids() {
        let nodes = vec![entry(0, 0xA), entry(1, 0xB)];
        let table = GlobalIdTable::build(&nodes, None).unwrap();
        assert_eq!(table.len(), 2);
        let id = CompactId::new(9, 1).unwrap();
        assert_eq!(table.resolve(id).unwrap(), ExtendedGuid::new(Uuid::from_u128(0xB), 9));
        let missing = CompactId::new(9, 5).unwrap();
        assert!(matches!(table.resolve(missing), Err(FormatError::UnresolvedCompactId { .. })));
    }

    #[test]
    fn copies_and_remaps_from_previous() {
        let previous =
            GlobalIdTable::build(&[entry(0, 1), entry(1, 2), entry(2, 3)], None).unwrap();
        let nodes = vec![
            FileNode::new(
                FileNodeId::GLOBAL_ID_TABLE_ENTRY2,
                FileNodeBody::GlobalIdTableEntry2(GlobalIdTableEntry2 {
                    index_map_from: 2,
                    index_map_to: 0,
                }),
            )
            .unwrap(),
            FileNode::new(
                FileNodeId::GLOBAL_ID_TABLE_ENTRY3,
                FileNodeBody::GlobalIdTableEntry3(GlobalIdTableEntry3 {
                    index_copy_from_start: 0,
                    entries_to_copy: 2,
                    index_copy_to_start: 10,
                }),
            )
            .unwrap(),
        ];
        let table = GlobalIdTable::build(&nodes, Some(&previous)).unwrap();
        assert_eq!(table.get(0), Some(Uuid::from_u128(3)));
        assert_eq!(table.get(10), Some(Uuid::from_u128(1)));
        assert_eq!(table.get(11), Some(Uuid::from_u128(2)));

        assert!(GlobalIdTable::build(&nodes, None).is_err());
    }
}
