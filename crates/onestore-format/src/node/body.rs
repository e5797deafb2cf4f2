//! Typed bodies of recognized file node kinds.
//!
//! Bodies that hold a chunk reference decode it with the `stpFormat` and
//! `cbFormat` codes of the enclosing node header, passed in as [`RefFormat`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use onestore_types::{
    BitReader, BitWriter, ByteCursor, ByteWriter, CompactId, ExtendedGuid, Jcid, TypeError,
};

use crate::chunk::{CbFormat, ChunkReference, StpFormat};
use crate::error::FormatResult;

/// Field encodings for a body's chunk reference.
pub type RefFormat = (StpFormat, CbFormat);

fn read_ref(cursor: &mut ByteCursor<'_>, fmt: RefFormat) -> FormatResult<ChunkReference> {
    ChunkReference::read_packed(cursor, fmt.0, fmt.1)
}

fn read_ref_count(cursor: &mut ByteCursor<'_>, large: bool) -> FormatResult<u32> {
    Ok(if large {
        cursor.read_u32()?
    } else {
        cursor.read_u8()? as u32
    })
}

fn write_ref_count(writer: &mut ByteWriter, count: u32, large: bool) -> FormatResult<()> {
    if large {
        writer.put_u32(count);
    } else {
        writer.put_uint_le(count as u64, 1)?;
    }
    Ok(())
}

/// A length-prefixed UTF-16 string (`cch` code units, then the units).
fn read_storage_string(cursor: &mut ByteCursor<'_>) -> FormatResult<String> {
    let offset = cursor.offset();
    let cch = cursor.read_u32()? as usize;
    let raw = cursor.read_bytes(cch.saturating_mul(2))?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| {
        TypeError::InvalidEncoding {
            offset,
            reason: format!("invalid UTF-16 string: {e}"),
        }
        .into()
    })
}

fn write_storage_string(writer: &mut ByteWriter, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    writer.put_u32(units.len() as u32);
    for unit in units {
        writer.put_u16(unit);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpaceManifestRoot {
    pub gosid_root: ExtendedGuid,
}

/// Reference to a child file node list, optionally tagged with the
/// identifier of what the list describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListReference {
    pub list_ref: ChunkReference,
    pub id: Option<ExtendedGuid>,
}

impl ListReference {
    pub(crate) fn read(
        cursor: &mut ByteCursor<'_>,
        fmt: RefFormat,
        with_id: bool,
    ) -> FormatResult<Self> {
        let list_ref = read_ref(cursor, fmt)?;
        let id = if with_id {
            Some(ExtendedGuid::read(cursor)?)
        } else {
            None
        };
        Ok(Self { list_ref, id })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) -> FormatResult<()> {
        self.list_ref.write(writer)?;
        if let Some(id) = &self.id {
            id.write(writer);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionManifestListStart {
    pub gosid: ExtendedGuid,
    pub n_instance: u32,
}

/// Start of a revision manifest.
///
/// The three record kinds share `rid`, `rid_dependent`, `revision_role` and
/// `odcs_default`; version 4 adds a creation time and version 7 a context id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionManifestStart {
    pub rid: ExtendedGuid,
    pub rid_dependent: ExtendedGuid,
    pub time_creation: Option<u64>,
    pub revision_role: u32,
    pub odcs_default: u16,
    pub gctxid: Option<ExtendedGuid>,
}

impl RevisionManifestStart {
    pub(crate) fn read4(cursor: &mut ByteCursor<'_>) -> FormatResult<Self> {
        let rid = ExtendedGuid::read(cursor)?;
        let rid_dependent = ExtendedGuid::read(cursor)?;
        let time_creation = Some(cursor.read_u64()?);
        let revision_role = cursor.read_u32()?;
        let odcs_default = cursor.read_u16()?;
        Ok(Self {
            rid,
            rid_dependent,
            time_creation,
            revision_role,
            odcs_default,
            gctxid: None,
        })
    }

    pub(crate) fn read6(cursor: &mut ByteCursor<'_>, with_context: bool) -> FormatResult<Self> {
        let rid = ExtendedGuid::read(cursor)?;
        let rid_dependent = ExtendedGuid::read(cursor)?;
        let revision_role = cursor.read_u32()?;
        let odcs_default = cursor.read_u16()?;
        let gctxid = if with_context {
            Some(ExtendedGuid::read(cursor)?)
        } else {
            None
        };
        Ok(Self {
            rid,
            rid_dependent,
            time_creation: None,
            revision_role,
            odcs_default,
            gctxid,
        })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter) {
        self.rid.write(writer);
        self.rid_dependent.write(writer);
        if let Some(t) = self.time_creation {
            writer.put_u64(t);
        }
        writer.put_u32(self.revision_role);
        writer.put_u16(self.odcs_default);
        if let Some(ctx) = &self.gctxid {
            ctx.write(writer);
        }
    }

    /// Creation time, converted from a Windows FILETIME.
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        // 100ns ticks between 1601-01-01 and the Unix epoch.
        const EPOCH_DELTA: i64 = 116_444_736_000_000_000;
        let ticks = i64::try_from(self.time_creation?).ok()? - EPOCH_DELTA;
        let secs = ticks.div_euclid(10_000_000);
        let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
        chrono::DateTime::from_timestamp(secs, nanos)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdTableEntry {
    pub index: u32,
    pub guid: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdTableEntry2 {
    pub index_map_from: u32,
    pub index_map_to: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdTableEntry3 {
    pub index_copy_from_start: u32,
    pub entries_to_copy: u32,
    pub index_copy_to_start: u32,
}

/// Object declaration with a 10-bit class index (`jci`) and storage format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeclarationWithRefCount {
    pub object_ref: ChunkReference,
    pub oid: CompactId,
    pub jci: u16,
    pub odcs: u8,
    pub reserved1: u8,
    pub has_oid_references: bool,
    pub has_osid_references: bool,
    pub reserved2: u32,
    pub ref_count: u32,
}

impl ObjectDeclarationWithRefCount {
    pub(crate) fn read(
        cursor: &mut ByteCursor<'_>,
        fmt: RefFormat,
        large: bool,
    ) -> FormatResult<Self> {
        let object_ref = read_ref(cursor, fmt)?;
        let oid = CompactId::read(cursor)?;
        let base = cursor.offset();
        let mut bits = BitReader::with_base(cursor.read_bytes(6)?, base);
        let jci = bits.read_uint(10)? as u16;
        let odcs = bits.read_uint(4)? as u8;
        let reserved1 = bits.read_uint(2)? as u8;
        let has_oid_references = bits.read_bool()?;
        let has_osid_references = bits.read_bool()?;
        let reserved2 = bits.read_uint(30)? as u32;
        let ref_count = read_ref_count(cursor, large)?;
        Ok(Self {
            object_ref,
            oid,
            jci,
            odcs,
            reserved1,
            has_oid_references,
            has_osid_references,
            reserved2,
            ref_count,
        })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter, large: bool) -> FormatResult<()> {
        self.object_ref.write(writer)?;
        self.oid.write(writer);
        let mut bits = BitWriter::new();
        bits.append_uint(self.jci as u64, 10)?;
        bits.append_uint(self.odcs as u64, 4)?;
        bits.append_uint(self.reserved1 as u64, 2)?;
        bits.append_bool(self.has_oid_references)?;
        bits.append_bool(self.has_osid_references)?;
        bits.append_uint(self.reserved2 as u64, 30)?;
        writer.put_bytes(&bits.finish());
        write_ref_count(writer, self.ref_count, large)
    }
}

/// A new revision of an existing object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRevisionWithRefCount {
    pub object_ref: ChunkReference,
    pub oid: CompactId,
    pub has_oid_references: bool,
    pub has_osid_references: bool,
    pub reserved: u32,
    pub ref_count: u32,
}

impl ObjectRevisionWithRefCount {
    /// Small form: flags and a 6-bit count share one byte.
    pub(crate) fn read(cursor: &mut ByteCursor<'_>, fmt: RefFormat) -> FormatResult<Self> {
        let object_ref = read_ref(cursor, fmt)?;
        let oid = CompactId::read(cursor)?;
        let base = cursor.offset();
        let mut bits = BitReader::with_base(cursor.read_bytes(1)?, base);
        let has_oid_references = bits.read_bool()?;
        let has_osid_references = bits.read_bool()?;
        let ref_count = bits.read_uint(6)? as u32;
        Ok(Self {
            object_ref,
            oid,
            has_oid_references,
            has_osid_references,
            reserved: 0,
            ref_count,
        })
    }

    /// Large form: a 32-bit flags word followed by a 32-bit count.
    pub(crate) fn read2(cursor: &mut ByteCursor<'_>, fmt: RefFormat) -> FormatResult<Self> {
        let object_ref = read_ref(cursor, fmt)?;
        let oid = CompactId::read(cursor)?;
        let base = cursor.offset();
        let mut bits = BitReader::with_base(cursor.read_bytes(4)?, base);
        let has_oid_references = bits.read_bool()?;
        let has_osid_references = bits.read_bool()?;
        let reserved = bits.read_uint(30)? as u32;
        let ref_count = cursor.read_u32()?;
        Ok(Self {
            object_ref,
            oid,
            has_oid_references,
            has_osid_references,
            reserved,
            ref_count,
        })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter, large: bool) -> FormatResult<()> {
        self.object_ref.write(writer)?;
        self.oid.write(writer);
        let mut bits = BitWriter::new();
        bits.append_bool(self.has_oid_references)?;
        bits.append_bool(self.has_osid_references)?;
        if large {
            bits.append_uint(self.reserved as u64, 30)?;
            writer.put_bytes(&bits.finish());
            writer.put_u32(self.ref_count);
        } else {
            bits.append_uint(self.ref_count as u64, 6)?;
            writer.put_bytes(&bits.finish());
        }
        Ok(())
    }
}

/// Root object of an object space, addressed by compact or extended id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootObjectId {
    Compact(CompactId),
    Extended(ExtendedGuid),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootObjectReference {
    pub oid_root: RootObjectId,
    pub root_role: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRoleDeclaration {
    pub rid: ExtendedGuid,
    pub revision_role: u32,
    pub gctxid: Option<ExtendedGuid>,
}

/// Declaration of an object whose data lives in a file data store or an
/// external file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeclarationFileData3 {
    pub oid: CompactId,
    pub jcid: Jcid,
    pub ref_count: u32,
    pub file_data_reference: String,
    pub extension: String,
}

impl ObjectDeclarationFileData3 {
    pub(crate) fn read(cursor: &mut ByteCursor<'_>, large: bool) -> FormatResult<Self> {
        let oid = CompactId::read(cursor)?;
        let jcid = Jcid::read(cursor)?;
        let ref_count = read_ref_count(cursor, large)?;
        let file_data_reference = read_storage_string(cursor)?;
        let extension = read_storage_string(cursor)?;
        Ok(Self {
            oid,
            jcid,
            ref_count,
            file_data_reference,
            extension,
        })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter, large: bool) -> FormatResult<()> {
        self.oid.write(writer);
        self.jcid.write(writer);
        write_ref_count(writer, self.ref_count, large)?;
        write_storage_string(writer, &self.file_data_reference);
        write_storage_string(writer, &self.extension);
        Ok(())
    }

    /// The data store GUID named by a `<ifndf>{guid}` reference, if any.
    pub fn file_data_store_guid(&self) -> Option<Uuid> {
        let guid = self.file_data_reference.strip_prefix("<ifndf>")?;
        Uuid::parse_str(guid.trim_start_matches('{').trim_end_matches('}')).ok()
    }
}

/// Dependency overrides, either referenced or stored inline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfoDependencyOverrides {
    pub data_ref: ChunkReference,
    pub inline_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDataStoreObjectReference {
    pub blob_ref: ChunkReference,
    pub guid_reference: Uuid,
}

/// Object declaration carrying a full [`Jcid`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeclaration2 {
    pub object_ref: ChunkReference,
    pub oid: CompactId,
    pub jcid: Jcid,
    pub has_oid_references: bool,
    pub has_osid_references: bool,
    pub reserved: u8,
    pub ref_count: u32,
    /// MD5 hash of the object data; present on read-only declarations only.
    pub md5_hash: Option<[u8; 16]>,
}

impl ObjectDeclaration2 {
    pub(crate) fn read(
        cursor: &mut ByteCursor<'_>,
        fmt: RefFormat,
        large: bool,
        read_only: bool,
    ) -> FormatResult<Self> {
        let object_ref = read_ref(cursor, fmt)?;
        let oid = CompactId::read(cursor)?;
        let jcid = Jcid::read(cursor)?;
        let base = cursor.offset();
        let mut bits = BitReader::with_base(cursor.read_bytes(1)?, base);
        let has_oid_references = bits.read_bool()?;
        let has_osid_references = bits.read_bool()?;
        let reserved = bits.read_uint(6)? as u8;
        let ref_count = read_ref_count(cursor, large)?;
        let md5_hash = if read_only {
            Some(cursor.read_array::<16>()?)
        } else {
            None
        };
        Ok(Self {
            object_ref,
            oid,
            jcid,
            has_oid_references,
            has_osid_references,
            reserved,
            ref_count,
            md5_hash,
        })
    }

    pub(crate) fn write(&self, writer: &mut ByteWriter, large: bool) -> FormatResult<()> {
        self.object_ref.write(writer)?;
        self.oid.write(writer);
        self.jcid.write(writer);
        let mut bits = BitWriter::new();
        bits.append_bool(self.has_oid_references)?;
        bits.append_bool(self.has_osid_references)?;
        bits.append_uint(self.reserved as u64, 6)?;
        writer.put_bytes(&bits.finish());
        write_ref_count(writer, self.ref_count, large)?;
        if let Some(hash) = &self.md5_hash {
            writer.put_bytes(hash);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedChunkDescriptor2 {
    pub blob_ref: ChunkReference,
    pub guid_hash: [u8; 16],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> RefFormat {
        (StpFormat::U32, CbFormat::U32)
    }

    fn data_ref() -> ChunkReference {
        ChunkReference::packed(0x400, 0x40, StpFormat::U32, CbFormat::U32).unwrap()
    }

    #[test]
    fn object_declaration_bit_fields() {
        let decl = ObjectDeclarationWithRefCount {
            object_ref: data_ref(),
            oid: CompactId::new(3, 17).unwrap(),
            jci: 0x3FF,
            odcs: 0x2,
            reserved1: 0,
            has_oid_references: true,
            has_osid_references: false,
            reserved2: 0,
            ref_count: 9,
        };
        let mut w = ByteWriter::new();
        decl.write(&mut w, false).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 8 + 4 + 6 + 1);
        // jci fills the low 10 bits of the packed word.
        assert_eq!(bytes[12], 0xFF);
        assert_eq!(bytes[13] & 0x03, 0x03);
        let mut cursor = ByteCursor::new(&bytes);
        let back = ObjectDeclarationWithRefCount::read(&mut cursor, fmt(), false).unwrap();
        assert_eq!(back, decl);
    }

    #[test]
    fn small_ref_count_overflow_is_rejected() {
        let decl = ObjectDeclarationWithRefCount {
            object_ref: data_ref(),
            oid: CompactId::from_u32(0),
            jci: 1,
            odcs: 0,
            reserved1: 0,
            has_oid_references: false,
            has_osid_references: false,
            reserved2: 0,
            ref_count: 300,
        };
        let mut w = ByteWriter::new();
        assert!(decl.write(&mut w, false).is_err());
        let mut w = ByteWriter::new();
        assert!(decl.write(&mut w, true).is_ok());
    }

    #[test]
    fn object_revision_small_packs_count() {
        let rev = ObjectRevisionWithRefCount {
            object_ref: data_ref(),
            oid: CompactId::new(1, 2).unwrap(),
            has_oid_references: true,
            has_osid_references: true,
            reserved: 0,
            ref_count: 63,
        };
        let mut w = ByteWriter::new();
        rev.write(&mut w, false).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes[12], 0xFF);
        let back = ObjectRevisionWithRefCount::read(&mut ByteCursor::new(&bytes), fmt()).unwrap();
        assert_eq!(back, rev);
    }

    #[test]
    fn storage_string_roundtrip() {
        let decl = ObjectDeclarationFileData3 {
            oid: CompactId::new(1, 1).unwrap(),
            jcid: Jcid::new(0x35, false, true),
            ref_count: 1,
            file_data_reference: "<ifndf>{b8b66f6e-fd63-4e2f-a6b6-ff7a0e0c6d34}".into(),
            extension: ".png".into(),
        };
        let mut w = ByteWriter::new();
        decl.write(&mut w, false).unwrap();
        let bytes = w.into_inner();
        let back = ObjectDeclarationFileData3::read(&mut ByteCursor::new(&bytes), false).unwrap();
        assert_eq!(back, decl);
        assert_eq!(
            back.file_data_store_guid(),
            Some(Uuid::parse_str("b8b66f6e-fd63-4e2f-a6b6-ff7a0e0c6d34").unwrap())
        );
    }

    #[test]
    fn storage_string_truncated() {
        let mut w = ByteWriter::new();
        w.put_u32(10);
        w.put_u16(0x41);
        let bytes = w.into_inner();
        let err = read_storage_string(&mut ByteCursor::new(&bytes)).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn creation_time_from_filetime() {
        let start = RevisionManifestStart {
            rid: ExtendedGuid::nil(),
            rid_dependent: ExtendedGuid::nil(),
            // 2000-01-01T00:00:00Z
            time_creation: Some(125_911_584_000_000_000),
            revision_role: 1,
            odcs_default: 0,
            gctxid: None,
        };
        let at = start.created_at().unwrap();
        assert_eq!(at.timestamp(), 946_684_800);
    }
}
