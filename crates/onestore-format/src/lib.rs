//! Revision store file format.
//!
//! Decodes the chunk-addressed layer of a revision store: the file header,
//! the transaction log, and file node lists stored as chains of fragments.
//! All bytes beyond the caller's first buffer are fetched through a
//! [`ChunkSource`], so the same decoders work over files, memory and remote
//! transports.
//!
//! # Key Types
//!
//! - [`ChunkReference`] - location and size of a byte range, in three encodings
//! - [`FileNode`] / [`FileNodeBody`] - typed records of a list
//! - [`FileNodeList`] - a logical list reassembled from its fragments
//! - [`NodeQuotaTable`] - committed node counts, owned per decode
//! - [`RevisionStoreFile`] - header, transaction log and root list together

pub mod chunk;
pub mod config;
pub mod error;
pub mod file;
pub mod gid;
pub mod header;
pub mod list;
pub mod node;
pub mod quota;
pub mod source;
pub mod txlog;

pub use chunk::{CbFormat, ChunkReference, StpFormat};
pub use config::DecodeConfig;
pub use error::{FormatError, FormatResult};
pub use file::RevisionStoreFile;
pub use gid::GlobalIdTable;
pub use header::{FileHeader, FileType};
pub use list::{decode_fragment, FileNodeList, FileNodeListFragment, FragmentHeader};
pub use node::{
    decode_file_node, encode_file_node, FileNode, FileNodeBody, FileNodeHeader, FileNodeId,
};
pub use quota::{NodeQuota, NodeQuotaTable};
pub use source::{ChunkSource, MappedSource, SliceSource};
pub use txlog::{TransactionEntry, TransactionLog, TransactionLogFragment};
