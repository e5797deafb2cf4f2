//! Byte providers for chunk references.
//!
//! Decoders never read files directly; every referenced range is fetched
//! through a [`ChunkSource`]. The transport behind it (an in-memory buffer,
//! a mapped file, a remote cell-storage service) is opaque to the decoder.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::debug;

use crate::chunk::ChunkReference;
use crate::error::{FormatError, FormatResult};

/// Provider of the bytes behind chunk references.
///
/// Implementations must return exactly `reference.length()` bytes starting
/// at `reference.location()`, or fail. Transport-specific failures are
/// wrapped with [`FormatError::transport`] and passed through unchanged.
pub trait ChunkSource: Send + Sync {
    fn fetch(&self, reference: &ChunkReference) -> FormatResult<Bytes>;

    /// Total size of the backing store, when known. Used to bound chain
    /// walks.
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for &S {
    fn fetch(&self, reference: &ChunkReference) -> FormatResult<Bytes> {
        (**self).fetch(reference)
    }

    fn len_hint(&self) -> Option<u64> {
        (**self).len_hint()
    }
}

fn slice_range(len: usize, reference: &ChunkReference) -> FormatResult<std::ops::Range<usize>> {
    let start = reference.location();
    let needed = reference.length();
    let available = (len as u64).saturating_sub(start);
    if start > len as u64 || needed > available {
        return Err(FormatError::TruncatedInput {
            offset: start,
            needed,
            available,
            list_id: None,
        });
    }
    Ok(start as usize..(start + needed) as usize)
}

/// An in-memory buffer.
#[derive(Clone, Debug)]
pub struct SliceSource {
    data: Bytes,
}

impl SliceSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

impl ChunkSource for SliceSource {
    fn fetch(&self, reference: &ChunkReference) -> FormatResult<Bytes> {
        let range = slice_range(self.data.len(), reference)?;
        Ok(self.data.slice(range))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// A memory-mapped file.
#[derive(Clone)]
pub struct MappedSource {
    mmap: Arc<Mmap>,
}

impl MappedSource {
    pub fn open(path: &Path) -> FormatResult<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only. A concurrent writer to the file
        // could change the bytes underneath, which at worst yields decode
        // errors since every read is bounds-checked.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), len = mmap.len(), "mapped revision store");
        Ok(Self { mmap: Arc::new(mmap) })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl std::fmt::Debug for MappedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedSource").field("len", &self.mmap.len()).finish()
    }
}

impl ChunkSource for MappedSource {
    fn fetch(&self, reference: &ChunkReference) -> FormatResult<Bytes> {
        let range = slice_range(self.mmap.len(), reference)?;
        Ok(Bytes::copy_from_slice(&self.mmap[range]))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.mmap.len() as u64)
    }
}
