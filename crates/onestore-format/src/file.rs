//! Opening a revision store file.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};

use crate::chunk::ChunkReference;
use crate::config::DecodeConfig;
use crate::error::FormatResult;
use crate::header::FileHeader;
use crate::list::FileNodeList;
use crate::node::FileNode;
use crate::quota::NodeQuotaTable;
use crate::source::ChunkSource;
use crate::txlog::TransactionLog;

/// A revision store file with its header, transaction log and root list
/// decoded. Child lists are read on demand through the same source.
pub struct RevisionStoreFile<S> {
    source: S,
    config: DecodeConfig,
    header: FileHeader,
    transaction_log: TransactionLog,
    quotas: NodeQuotaTable,
    root: FileNodeList,
}

impl<S: ChunkSource> RevisionStoreFile<S> {
    /// Decode header, then transaction log, then the root file node list.
    pub fn open(source: S, config: DecodeConfig) -> FormatResult<Self> {
        let header_bytes = source.fetch(&ChunkReference::Fixed64x32 {
            stp: 0,
            cb: FileHeader::SIZE as u32,
        })?;
        let header = FileHeader::decode(&header_bytes)?;
        let transaction_log = TransactionLog::read(
            &source,
            &header.fcr_transaction_log,
            header.c_transactions_in_log,
            &config,
        )?;
        let quotas = NodeQuotaTable::from_transaction_log(&transaction_log);
        let root = FileNodeList::read(&source, &header.fcr_file_node_list_root, &quotas, &config)?;
        info!(
            file_type = ?header.file_type(),
            transactions = header.c_transactions_in_log,
            root_nodes = root.len(),
            "opened revision store"
        );
        Ok(Self {
            source,
            config,
            header,
            transaction_log,
            quotas,
            root,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn transaction_log(&self) -> &TransactionLog {
        &self.transaction_log
    }

    pub fn quotas(&self) -> &NodeQuotaTable {
        &self.quotas
    }

    pub fn root(&self) -> &FileNodeList {
        &self.root
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Read the list referenced by `node`, if the node references one.
    pub fn child_list(&self, node: &FileNode) -> FormatResult<Option<FileNodeList>> {
        if node.header.base_type != 2 {
            return Ok(None);
        }
        match node.chunk_reference() {
            Some(reference) if !reference.is_nil() => {
                FileNodeList::read(&self.source, reference, &self.quotas, &self.config).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Every list reachable from the root, breadth first. A list referenced
    /// more than once is read once.
    pub fn all_lists(&self) -> FormatResult<Vec<FileNodeList>> {
        let mut seen = HashSet::from([self.header.fcr_file_node_list_root.location()]);
        let mut out = vec![self.root.clone()];
        let mut queue: VecDeque<usize> = VecDeque::from([0]);
        while let Some(index) = queue.pop_front() {
            let mut children = Vec::new();
            for node in out[index].nodes() {
                let location = match node.chunk_reference() {
                    Some(r) if node.header.base_type == 2 && !r.is_nil() => r.location(),
                    _ => continue,
                };
                if !seen.insert(location) {
                    continue;
                }
                if let Some(list) = self.child_list(node)? {
                    children.push(list);
                }
            }
            for list in children {
                debug!(list_id = list.list_id, nodes = list.len(), "read child list");
                queue.push_back(out.len());
                out.push(list);
            }
        }
        Ok(out)
    }

    /// Nodes kept as raw bytes across every reachable list.
    pub fn unparsed_count(&self) -> FormatResult<usize> {
        Ok(self.all_lists()?.iter().map(FileNodeList::unparsed_count).sum())
    }
}
