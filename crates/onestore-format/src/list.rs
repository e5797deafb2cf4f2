//! File node lists and their fragments.
//!
//! A logical list is stored as one or more fragments chained by a forward
//! reference. Each fragment is framed by a magic header and a footer:
//!
//! ```text
//! +--------+-------------+---------+----------------+--------+
//! | header | nodes ...   | padding | next fragment  | footer |
//! | 16 B   |             |         | 12 B           | 8 B    |
//! +--------+-------------+---------+----------------+--------+
//! ```
//!
//! The fragment's declared size is authoritative, so
//! `36 + sum(node sizes) + padding == declared size` always holds for a
//! decoded fragment.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use onestore_types::{ByteCursor, ByteWriter};

use crate::chunk::ChunkReference;
use crate::config::DecodeConfig;
use crate::error::{FormatError, FormatResult};
use crate::node::{FileNode, FileNodeHeader};
use crate::quota::{NodeQuota, NodeQuotaTable};
use crate::source::ChunkSource;

pub const FRAGMENT_MAGIC: u64 = 0xA456_7AB1_F5F7_F4C4;
pub const FRAGMENT_FOOTER: u64 = 0x8BC2_15C3_8233_BA4B;
/// Header, next-fragment reference and footer.
pub const FRAGMENT_OVERHEAD: usize = FragmentHeader::SIZE + ChunkReference::FIXED64X32_SIZE + 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHeader {
    pub magic: u64,
    pub list_id: u32,
    pub fragment_sequence: u32,
}

impl FragmentHeader {
    pub const SIZE: usize = 16;

    pub fn new(list_id: u32, fragment_sequence: u32) -> Self {
        Self {
            magic: FRAGMENT_MAGIC,
            list_id,
            fragment_sequence,
        }
    }

    /// Read and validate the magic value.
    pub fn read(cursor: &mut ByteCursor<'_>) -> FormatResult<Self> {
        let offset = cursor.offset();
        let magic = cursor.read_u64()?;
        let list_id = cursor.read_u32()?;
        let fragment_sequence = cursor.read_u32()?;
        if magic != FRAGMENT_MAGIC {
            return Err(FormatError::framing(
                offset,
                format!("fragment magic {magic:#018x} does not match {FRAGMENT_MAGIC:#018x}"),
            )
            .in_list(list_id));
        }
        Ok(Self {
            magic,
            list_id,
            fragment_sequence,
        })
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.magic);
        writer.put_u32(self.list_id);
        writer.put_u32(self.fragment_sequence);
    }
}

/// One decoded fragment.
///
/// Filler nodes are not kept in `nodes`. Each one is recorded in `fillers`
/// as the index into `nodes` before which it stood, with its header exactly
/// as read, so the fragment re-encodes byte for byte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNodeListFragment {
    pub header: FragmentHeader,
    pub nodes: Vec<FileNode>,
    pub fillers: Vec<(usize, FileNodeHeader)>,
    pub padding: Vec<u8>,
    pub next_fragment: ChunkReference,
    pub footer: u64,
}

impl FileNodeListFragment {
    /// Build a fragment of exactly `declared_size` bytes, zero-padded.
    pub fn build(
        list_id: u32,
        fragment_sequence: u32,
        nodes: Vec<FileNode>,
        next_fragment: ChunkReference,
        declared_size: usize,
    ) -> FormatResult<Self> {
        let used: usize = FRAGMENT_OVERHEAD + nodes.iter().map(FileNode::size).sum::<usize>();
        if used > declared_size {
            return Err(FormatError::framing(
                0,
                format!("{used} bytes of nodes and framing exceed fragment size {declared_size}"),
            )
            .in_list(list_id));
        }
        Ok(Self {
            header: FragmentHeader::new(list_id, fragment_sequence),
            nodes,
            fillers: Vec::new(),
            padding: vec![0; declared_size - used],
            next_fragment,
            footer: FRAGMENT_FOOTER,
        })
    }

    pub fn list_id(&self) -> u32 {
        self.header.list_id
    }

    /// Bytes taken by nodes, filler included.
    pub fn node_bytes(&self) -> usize {
        self.nodes.iter().map(FileNode::size).sum::<usize>()
            + self.fillers.len() * FileNodeHeader::SIZE
    }

    pub fn encoded_len(&self) -> usize {
        FRAGMENT_OVERHEAD + self.node_bytes() + self.padding.len()
    }

    pub fn encode(&self) -> FormatResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        self.header.write(&mut writer);
        let mut fillers = self.fillers.iter().peekable();
        for (index, node) in self.nodes.iter().enumerate() {
            while let Some((_, filler)) = fillers.next_if(|(at, _)| *at == index) {
                filler.write(&mut writer)?;
            }
            node.write(&mut writer)?;
        }
        for (_, filler) in fillers {
            filler.write(&mut writer)?;
        }
        writer.put_bytes(&self.padding);
        if !matches!(self.next_fragment, ChunkReference::Fixed64x32 { .. }) {
            let err = FormatError::framing(0, "next fragment must be a 12-byte reference");
            return Err(err.in_list(self.list_id()));
        }
        self.next_fragment.write(&mut writer)?;
        writer.put_u64(self.footer);
        Ok(writer.into_inner())
    }
}

/// Decode the fragment occupying the first `declared_size` bytes of `bytes`.
///
/// `base` is the fragment's location in the backing store and only affects
/// error offsets. `quota` is decremented for every non-terminator node and
/// stays with the caller so it can be carried into the next fragment.
pub fn decode_fragment(
    bytes: &[u8],
    base: u64,
    declared_size: usize,
    quota: &mut NodeQuota,
    config: &DecodeConfig,
) -> FormatResult<FileNodeListFragment> {
    if declared_size < FRAGMENT_OVERHEAD {
        return Err(FormatError::framing(
            base,
            format!("fragment size {declared_size} is below its {FRAGMENT_OVERHEAD}-byte framing"),
        ));
    }
    let mut cursor = ByteCursor::with_base(bytes, base);
    let mut cursor = cursor.sub_cursor(declared_size)?;
    let header = FragmentHeader::read(&mut cursor)?;
    let list_id = header.list_id;

    let node_area = declared_size - FRAGMENT_OVERHEAD;
    let mut nodes_cursor = cursor
        .sub_cursor(node_area)
        .map_err(|e| FormatError::from(e).in_list(list_id))?;
    let mut nodes = Vec::new();
    let mut fillers = Vec::new();
    while node_area - nodes_cursor.position() > FileNodeHeader::SIZE && quota.has_capacity() {
        let node = FileNode::read(&mut nodes_cursor, config).map_err(|e| e.in_list(list_id))?;
        if node.is_filler() {
            fillers.push((nodes.len(), node.header));
            quota.consume();
            continue;
        }
        let terminator = node.is_terminator();
        if !terminator {
            quota.consume();
        }
        nodes.push(node);
        if terminator {
            break;
        }
    }
    let padding = nodes_cursor.rest().to_vec();

    let next_fragment =
        ChunkReference::read_fixed64x32(&mut cursor).map_err(|e| e.in_list(list_id))?;
    let footer_offset = cursor.offset();
    let footer = cursor.read_u64().map_err(|e| FormatError::from(e).in_list(list_id))?;
    if footer != FRAGMENT_FOOTER {
        return Err(FormatError::framing(
            footer_offset,
            format!("fragment footer {footer:#018x} does not match {FRAGMENT_FOOTER:#018x}"),
        )
        .in_list(list_id));
    }
    trace!(
        list_id,
        sequence = header.fragment_sequence,
        nodes = nodes.len(),
        padding = padding.len(),
        "decoded fragment"
    );
    Ok(FileNodeListFragment {
        header,
        nodes,
        fillers,
        padding,
        next_fragment,
        footer,
    })
}

/// A logical file node list reassembled from its fragment chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNodeList {
    pub list_id: u32,
    pub fragments: Vec<FileNodeListFragment>,
}

impl FileNodeList {
    /// Read a list by following its fragment chain from `first`.
    ///
    /// The chain ends at a nil next-fragment reference. A zero reference,
    /// a fragment from another list, a sequence gap, a revisited location or
    /// more fragments than the source can hold are all `MalformedFraming`.
    /// Once the list's node quota is used up no further fragments are
    /// fetched.
    pub fn read<S: ChunkSource + ?Sized>(
        source: &S,
        first: &ChunkReference,
        quotas: &NodeQuotaTable,
        config: &DecodeConfig,
    ) -> FormatResult<Self> {
        let max_fragments = match source.len_hint() {
            Some(len) => config.max_fragments.min((len / FRAGMENT_OVERHEAD as u64) as usize + 1),
            None => config.max_fragments,
        };
        let mut reference = *first;
        let mut visited = HashSet::new();
        let mut fragments: Vec<FileNodeListFragment> = Vec::new();
        let mut quota: Option<NodeQuota> = None;

        loop {
            let location = reference.location();
            let list_id = fragments.first().map(FileNodeListFragment::list_id);
            if fragments.len() >= max_fragments {
                let err = FormatError::framing(
                    location,
                    format!("fragment chain exceeds {max_fragments} fragments"),
                );
                return Err(match list_id {
                    Some(id) => err.in_list(id),
                    None => err,
                });
            }
            if !visited.insert(location) {
                let err = FormatError::framing(location, "fragment chain revisits a location");
                return Err(match list_id {
                    Some(id) => err.in_list(id),
                    None => err,
                });
            }

            let bytes = source.fetch(&reference)?;
            let header = FragmentHeader::read(&mut ByteCursor::with_base(&bytes, location))?;
            if let Some(prev) = fragments.last() {
                if header.list_id != prev.list_id() {
                    return Err(FormatError::framing(
                        location,
                        format!("fragment belongs to list {:#x}", header.list_id),
                    )
                    .in_list(prev.list_id()));
                }
                if header.fragment_sequence != prev.header.fragment_sequence.wrapping_add(1) {
                    return Err(FormatError::framing(
                        location,
                        format!(
                            "fragment sequence {} does not follow {}",
                            header.fragment_sequence, prev.header.fragment_sequence
                        ),
                    )
                    .in_list(prev.list_id()));
                }
            }
            let quota = quota.get_or_insert_with(|| quotas.quota_for(header.list_id));

            let fragment = decode_fragment(&bytes, location, bytes.len(), quota, config)?;
            let next = fragment.next_fragment;
            let list_id = fragment.list_id();
            fragments.push(fragment);

            if next.is_nil() {
                break;
            }
            if next.is_zero() {
                let err = FormatError::framing(location, "next fragment reference is zero");
                return Err(err.in_list(list_id));
            }
            if quota.is_exhausted() {
                debug!(
                    list_id,
                    location = next.location(),
                    "node quota used up, not following chain"
                );
                break;
            }
            debug!(list_id, from = location, to = next.location(), "following fragment chain");
            reference = next;
        }

        let list_id = fragments.first().map(FileNodeListFragment::list_id).unwrap_or_default();
        Ok(Self { list_id, fragments })
    }

    /// Nodes of every fragment in chain order, filler excluded.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.fragments.iter().flat_map(|f| f.nodes.iter())
    }

    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.nodes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragments(&self) -> &[FileNodeListFragment] {
        &self.fragments
    }

    /// Number of nodes kept as raw bytes because their kind is unknown.
    pub fn unparsed_count(&self) -> usize {
        self.nodes().filter(|n| !n.is_recognized()).count()
    }

    /// Re-encode the fragment at `index`.
    pub fn encode_fragment(&self, index: usize) -> FormatResult<Vec<u8>> {
        let fragment = self.fragments.get(index).ok_or_else(|| {
            FormatError::framing(0, format!("list has no fragment {index}")).in_list(self.list_id)
        })?;
        fragment.encode()
    }
}
