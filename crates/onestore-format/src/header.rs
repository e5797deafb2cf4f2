//! The 1024-byte header at the start of every revision store file.

use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

use onestore_types::{ByteCursor, ByteWriter};

use crate::chunk::ChunkReference;
use crate::error::{FormatError, FormatResult};

pub const GUID_FILE_TYPE_ONE: Uuid = uuid!("7B5C52E4-D88C-4DA7-AEB1-5378D02996D3");
pub const GUID_FILE_TYPE_ONETOC2: Uuid = uuid!("43FF2FA1-EFD9-4C76-9EE2-10EA5722765F");
pub const GUID_FILE_FORMAT: Uuid = uuid!("109ADD3F-911B-49F5-A5D0-1791EDC8AED8");

/// Kind of revision store file, from `guid_file_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// A section file (`.one`).
    Section,
    /// A table of contents file (`.onetoc2`).
    TableOfContents,
}

impl FileType {
    pub fn from_guid(guid: Uuid) -> Option<Self> {
        match guid {
            GUID_FILE_TYPE_ONE => Some(Self::Section),
            GUID_FILE_TYPE_ONETOC2 => Some(Self::TableOfContents),
            _ => None,
        }
    }

    pub fn guid(self) -> Uuid {
        match self {
            Self::Section => GUID_FILE_TYPE_ONE,
            Self::TableOfContents => GUID_FILE_TYPE_ONETOC2,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Section => "one",
            Self::TableOfContents => "onetoc2",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub guid_file_type: Uuid,
    pub guid_file: Uuid,
    pub guid_legacy_file_version: Uuid,
    pub guid_file_format: Uuid,
    pub ffv_last_code_that_wrote_to_this_file: u32,
    pub ffv_oldest_code_that_has_written_to_this_file: u32,
    pub ffv_newest_code_that_has_written_to_this_file: u32,
    pub ffv_oldest_code_that_may_read_this_file: u32,
    pub fcr_legacy_free_chunk_list: ChunkReference,
    pub fcr_legacy_transaction_log: ChunkReference,
    pub c_transactions_in_log: u32,
    pub cb_legacy_expected_file_length: u32,
    pub rgb_placeholder: u64,
    pub fcr_legacy_file_node_list_root: ChunkReference,
    pub cb_legacy_free_space_in_free_chunk_list: u32,
    pub f_needs_defrag: u8,
    pub f_repaired_file: u8,
    pub f_needs_garbage_collect: u8,
    pub f_has_no_embedded_file_objects: u8,
    pub guid_ancestor: Uuid,
    pub crc_name: u32,
    pub fcr_hashed_chunk_list: ChunkReference,
    pub fcr_transaction_log: ChunkReference,
    pub fcr_file_node_list_root: ChunkReference,
    pub fcr_free_chunk_list: ChunkReference,
    pub cb_expected_file_length: u64,
    pub cb_free_space_in_free_chunk_list: u64,
    pub guid_file_version: Uuid,
    pub n_file_version_generation: u64,
    pub guid_deny_read_file_version: Uuid,
    pub grf_debug_log_flags: u32,
    pub fcr_debug_log: ChunkReference,
    pub fcr_alloc_verification_free_chunk_list: ChunkReference,
    pub bn_created: u32,
    pub bn_last_wrote_to_this_file: u32,
    pub bn_oldest_written: u32,
    pub bn_newest_written: u32,
    pub rgb_reserved: Vec<u8>,
}

impl FileHeader {
    pub const SIZE: usize = 1024;
    pub const RESERVED_SIZE: usize = 728;

    /// A header for an empty file of the given type, with every reference
    /// nil.
    pub fn new(file_type: FileType, guid_file: Uuid) -> Self {
        Self {
            guid_file_type: file_type.guid(),
            guid_file,
            guid_legacy_file_version: Uuid::nil(),
            guid_file_format: GUID_FILE_FORMAT,
            ffv_last_code_that_wrote_to_this_file: 0x2A,
            ffv_oldest_code_that_has_written_to_this_file: 0x2A,
            ffv_newest_code_that_has_written_to_this_file: 0x2A,
            ffv_oldest_code_that_may_read_this_file: 0x2A,
            fcr_legacy_free_chunk_list: ChunkReference::Fixed32 { stp: 0, cb: 0 },
            fcr_legacy_transaction_log: ChunkReference::nil_fixed32(),
            c_transactions_in_log: 0,
            cb_legacy_expected_file_length: 0,
            rgb_placeholder: 0,
            fcr_legacy_file_node_list_root: ChunkReference::nil_fixed32(),
            cb_legacy_free_space_in_free_chunk_list: 0,
            f_needs_defrag: 0,
            f_repaired_file: 0,
            f_needs_garbage_collect: 0,
            f_has_no_embedded_file_objects: 0,
            guid_ancestor: Uuid::nil(),
            crc_name: 0,
            fcr_hashed_chunk_list: ChunkReference::nil_fixed64x32(),
            fcr_transaction_log: ChunkReference::nil_fixed64x32(),
            fcr_file_node_list_root: ChunkReference::nil_fixed64x32(),
            fcr_free_chunk_list: ChunkReference::nil_fixed64x32(),
            cb_expected_file_length: Self::SIZE as u64,
            cb_free_space_in_free_chunk_list: 0,
            guid_file_version: Uuid::nil(),
            n_file_version_generation: 0,
            guid_deny_read_file_version: Uuid::nil(),
            grf_debug_log_flags: 0,
            fcr_debug_log: ChunkReference::Fixed64x32 { stp: 0, cb: 0 },
            fcr_alloc_verification_free_chunk_list: ChunkReference::Fixed64x32 { stp: 0, cb: 0 },
            bn_created: 0,
            bn_last_wrote_to_this_file: 0,
            bn_oldest_written: 0,
            bn_newest_written: 0,
            rgb_reserved: vec![0; Self::RESERVED_SIZE],
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_guid(self.guid_file_type)
    }

    /// Decode a header from the first 1024 bytes of `bytes`.
    ///
    /// Fails with `MalformedFraming` when the format GUID is not the
    /// revision store format.
    pub fn decode(bytes: &[u8]) -> FormatResult<Self> {
        let mut c = ByteCursor::new(bytes);
        let header = Self {
            guid_file_type: c.read_guid()?,
            guid_file: c.read_guid()?,
            guid_legacy_file_version: c.read_guid()?,
            guid_file_format: c.read_guid()?,
            ffv_last_code_that_wrote_to_this_file: c.read_u32()?,
            ffv_oldest_code_that_has_written_to_this_file: c.read_u32()?,
            ffv_newest_code_that_has_written_to_this_file: c.read_u32()?,
            ffv_oldest_code_that_may_read_this_file: c.read_u32()?,
            fcr_legacy_free_chunk_list: ChunkReference::read_fixed32(&mut c)?,
            fcr_legacy_transaction_log: ChunkReference::read_fixed32(&mut c)?,
            c_transactions_in_log: c.read_u32()?,
            cb_legacy_expected_file_length: c.read_u32()?,
            rgb_placeholder: c.read_u64()?,
            fcr_legacy_file_node_list_root: ChunkReference::read_fixed32(&mut c)?,
            cb_legacy_free_space_in_free_chunk_list: c.read_u32()?,
            f_needs_defrag: c.read_u8()?,
            f_repaired_file: c.read_u8()?,
            f_needs_garbage_collect: c.read_u8()?,
            f_has_no_embedded_file_objects: c.read_u8()?,
            guid_ancestor: c.read_guid()?,
            crc_name: c.read_u32()?,
            fcr_hashed_chunk_list: ChunkReference::read_fixed64x32(&mut c)?,
            fcr_transaction_log: ChunkReference::read_fixed64x32(&mut c)?,
            fcr_file_node_list_root: ChunkReference::read_fixed64x32(&mut c)?,
            fcr_free_chunk_list: ChunkReference::read_fixed64x32(&mut c)?,
            cb_expected_file_length: c.read_u64()?,
            cb_free_space_in_free_chunk_list: c.read_u64()?,
            guid_file_version: c.read_guid()?,
            n_file_version_generation: c.read_u64()?,
            guid_deny_read_file_version: c.read_guid()?,
            grf_debug_log_flags: c.read_u32()?,
            fcr_debug_log: ChunkReference::read_fixed64x32(&mut c)?,
            fcr_alloc_verification_free_chunk_list: ChunkReference::read_fixed64x32(&mut c)?,
            bn_created: c.read_u32()?,
            bn_last_wrote_to_this_file: c.read_u32()?,
            bn_oldest_written: c.read_u32()?,
            bn_newest_written: c.read_u32()?,
            rgb_reserved: c.read_bytes(Self::RESERVED_SIZE)?.to_vec(),
        };
        if header.guid_file_format != GUID_FILE_FORMAT {
            return Err(FormatError::framing(
                48,
                format!("file format GUID {} is not a revision store", header.guid_file_format),
            ));
        }
        Ok(header)
    }

    pub fn encode(&self) -> FormatResult<Vec<u8>> {
        if self.rgb_reserved.len() != Self::RESERVED_SIZE {
            return Err(FormatError::framing(
                (Self::SIZE - Self::RESERVED_SIZE) as u64,
                format!(
                    "reserved area is {} bytes, expected {}",
                    self.rgb_reserved.len(),
                    Self::RESERVED_SIZE
                ),
            ));
        }
        let mut w = ByteWriter::new();
        w.put_guid(&self.guid_file_type);
        w.put_guid(&self.guid_file);
        w.put_guid(&self.guid_legacy_file_version);
        w.put_guid(&self.guid_file_format);
        w.put_u32(self.ffv_last_code_that_wrote_to_this_file);
        w.put_u32(self.ffv_oldest_code_that_has_written_to_this_file);
        w.put_u32(self.ffv_newest_code_that_has_written_to_this_file);
        w.put_u32(self.ffv_oldest_code_that_may_read_this_file);
        write_fixed32(&mut w, &self.fcr_legacy_free_chunk_list)?;
        write_fixed32(&mut w, &self.fcr_legacy_transaction_log)?;
        w.put_u32(self.c_transactions_in_log);
        w.put_u32(self.cb_legacy_expected_file_length);
        w.put_u64(self.rgb_placeholder);
        write_fixed32(&mut w, &self.fcr_legacy_file_node_list_root)?;
        w.put_u32(self.cb_legacy_free_space_in_free_chunk_list);
        w.put_u8(self.f_needs_defrag);
        w.put_u8(self.f_repaired_file);
        w.put_u8(self.f_needs_garbage_collect);
        w.put_u8(self.f_has_no_embedded_file_objects);
        w.put_guid(&self.guid_ancestor);
        w.put_u32(self.crc_name);
        write_fixed64x32(&mut w, &self.fcr_hashed_chunk_list)?;
        write_fixed64x32(&mut w, &self.fcr_transaction_log)?;
        write_fixed64x32(&mut w, &self.fcr_file_node_list_root)?;
        write_fixed64x32(&mut w, &self.fcr_free_chunk_list)?;
        w.put_u64(self.cb_expected_file_length);
        w.put_u64(self.cb_free_space_in_free_chunk_list);
        w.put_guid(&self.guid_file_version);
        w.put_u64(self.n_file_version_generation);
        w.put_guid(&self.guid_deny_read_file_version);
        w.put_u32(self.grf_debug_log_flags);
        write_fixed64x32(&mut w, &self.fcr_debug_log)?;
        write_fixed64x32(&mut w, &self.fcr_alloc_verification_free_chunk_list)?;
        w.put_u32(self.bn_created);
        w.put_u32(self.bn_last_wrote_to_this_file);
        w.put_u32(self.bn_oldest_written);
        w.put_u32(self.bn_newest_written);
        w.put_bytes(&self.rgb_reserved);
        Ok(w.into_inner())
    }
}

fn write_fixed32(w: &mut ByteWriter, reference: &ChunkReference) -> FormatResult<()> {
    match reference {
        ChunkReference::Fixed32 { .. } => reference.write(w),
        other => Err(FormatError::framing(0, format!("{other:?} is not a 8-byte reference"))),
    }
}

fn write_fixed64x32(w: &mut ByteWriter, reference: &ChunkReference) -> FormatResult<()> {
    match reference {
        ChunkReference::Fixed64x32 { .. } => reference.write(w),
        other => Err(FormatError::framing(0, format!("{other:?} is not a 12-byte reference"))),
    }
}
