//! Per-list node count limits.
//!
//! The transaction log records how many nodes each file node list holds as
//! of the last committed transaction. Nodes beyond that count belong to an
//! uncommitted write and must not be read. A [`NodeQuotaTable`] is owned by a
//! single decode; each list read takes its own [`NodeQuota`] from it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maximum committed node count per file node list id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeQuotaTable {
    limits: BTreeMap<u32, u32>,
}

impl NodeQuotaTable {
    /// A table with no limits: every list is read to its terminator.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, list_id: u32, max_nodes: u32) -> Self {
        self.limits.insert(list_id, max_nodes);
        self
    }

    pub fn set_limit(&mut self, list_id: u32, max_nodes: u32) {
        self.limits.insert(list_id, max_nodes);
    }

    pub fn limit(&self, list_id: u32) -> Option<u32> {
        self.limits.get(&list_id).copied()
    }

    /// A fresh budget for one read of `list_id`.
    pub fn quota_for(&self, list_id: u32) -> NodeQuota {
        match self.limit(list_id) {
            Some(n) => NodeQuota::Limited(n),
            None => NodeQuota::Unbounded,
        }
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.limits.iter().map(|(k, v)| (*k, *v))
    }
}

/// Remaining node budget for a list being read, carried across fragments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeQuota {
    Unbounded,
    Limited(u32),
}

impl NodeQuota {
    pub fn has_capacity(&self) -> bool {
        !matches!(self, Self::Limited(0))
    }

    /// Account for one node.
    pub fn consume(&mut self) {
        if let Self::Limited(n) = self {
            *n = n.saturating_sub(1);
        }
    }

    pub fn is_exhausted(&self) -> bool {
        !self.has_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_without_entry_are_unbounded() {
        let table = NodeQuotaTable::unbounded().with_limit(0x10, 2);
        assert_eq!(table.quota_for(0x11), NodeQuota::Unbounded);
        assert_eq!(table.quota_for(0x10), NodeQuota::Limited(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn quota_consumption() {
        let table = NodeQuotaTable::unbounded().with_limit(1, 2);
        let mut q = table.quota_for(1);
        assert!(q.has_capacity());
        q.consume();
        q.consume();
        assert!(q.is_exhausted());
        q.consume();
        assert_eq!(q, NodeQuota::Limited(0));
        // The table itself is untouched by reads.
        assert_eq!(table.limit(1), Some(2));

        let mut unbounded = NodeQuota::Unbounded;
        unbounded.consume();
        assert!(unbounded.has_capacity());
    }
}
