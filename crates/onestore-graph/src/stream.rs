//! Stream object headers.
//!
//! Cell-storage structures are sequences of stream objects. Each starts with
//! a 16- or 32-bit header carrying its type, a compound flag and (for
//! non-compound objects) its byte length. Compound objects contain further
//! stream objects and close with an 8- or 16-bit end header.
//!
//! ```text
//! 16-bit start   A=0 (2) | compound (1) | type (6)  | length (7)
//! 32-bit start   A=2 (2) | compound (1) | type (14) | length (15)
//! 8-bit end      A=1 (2) | type (6)
//! 16-bit end     A=3 (2) | type (14)
//! ```
//!
//! A 32-bit header with length `0x7FFF` is followed by the real length as a
//! compact integer.

use std::fmt;

use serde::{Deserialize, Serialize};

use onestore_types::{
    read_compact_u64, write_compact_u64, BitReader, BitWriter, ByteCursor, ByteWriter,
};

use crate::error::{GraphError, GraphResult};

/// The type field of a stream object header.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamObjectType(pub u16);

impl StreamObjectType {
    pub const DATA_ELEMENT: Self = Self(0x01);
    pub const OBJECT_DATA_BLOB: Self = Self(0x02);
    pub const OBJECT_GROUP_OBJECT_BLOB_DATA_DECLARATION: Self = Self(0x05);
    pub const STORAGE_MANIFEST_ROOT_DECLARE: Self = Self(0x07);
    pub const REVISION_MANIFEST_ROOT_DECLARE: Self = Self(0x0A);
    pub const CELL_MANIFEST_CURRENT_REVISION: Self = Self(0x0B);
    pub const STORAGE_MANIFEST_SCHEMA_GUID: Self = Self(0x0C);
    pub const STORAGE_INDEX_REVISION_MAPPING: Self = Self(0x0D);
    pub const STORAGE_INDEX_CELL_MAPPING: Self = Self(0x0E);
    pub const STORAGE_INDEX_MANIFEST_MAPPING: Self = Self(0x11);
    pub const DATA_ELEMENT_PACKAGE: Self = Self(0x15);
    pub const OBJECT_GROUP_OBJECT_DATA: Self = Self(0x16);
    pub const OBJECT_GROUP_OBJECT_DECLARE: Self = Self(0x18);
    pub const REVISION_MANIFEST_OBJECT_GROUP_REFERENCES: Self = Self(0x19);
    pub const REVISION_MANIFEST: Self = Self(0x1A);
    pub const OBJECT_GROUP_OBJECT_DATA_BLOB_REFERENCE: Self = Self(0x1C);
    pub const OBJECT_GROUP_DECLARATIONS: Self = Self(0x1D);
    pub const OBJECT_GROUP_DATA: Self = Self(0x1E);
    pub const OBJECT_GROUP_METADATA: Self = Self(0x78);
    pub const OBJECT_GROUP_METADATA_DECLARATIONS: Self = Self(0x79);

    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::DATA_ELEMENT => "DataElement",
            Self::OBJECT_DATA_BLOB => "ObjectDataBLOB",
            Self::OBJECT_GROUP_OBJECT_BLOB_DATA_DECLARATION => {
                "ObjectGroupObjectBLOBDataDeclaration"
            }
            Self::STORAGE_MANIFEST_ROOT_DECLARE => "StorageManifestRootDeclare",
            Self::REVISION_MANIFEST_ROOT_DECLARE => "RevisionManifestRootDeclare",
            Self::CELL_MANIFEST_CURRENT_REVISION => "CellManifestCurrentRevision",
            Self::STORAGE_MANIFEST_SCHEMA_GUID => "StorageManifestSchemaGUID",
            Self::STORAGE_INDEX_REVISION_MAPPING => "StorageIndexRevisionMapping",
            Self::STORAGE_INDEX_CELL_MAPPING => "StorageIndexCellMapping",
            Self::STORAGE_INDEX_MANIFEST_MAPPING => "StorageIndexManifestMapping",
            Self::DATA_ELEMENT_PACKAGE => "DataElementPackage",
            Self::OBJECT_GROUP_OBJECT_DATA => "ObjectGroupObjectData",
            Self::OBJECT_GROUP_OBJECT_DECLARE => "ObjectGroupObjectDeclare",
            Self::REVISION_MANIFEST_OBJECT_GROUP_REFERENCES => {
                "RevisionManifestObjectGroupReferences"
            }
            Self::REVISION_MANIFEST => "RevisionManifest",
            Self::OBJECT_GROUP_OBJECT_DATA_BLOB_REFERENCE => "ObjectGroupObjectDataBLOBReference",
            Self::OBJECT_GROUP_DECLARATIONS => "ObjectGroupDeclarations",
            Self::OBJECT_GROUP_DATA => "ObjectGroupData",
            Self::OBJECT_GROUP_METADATA => "ObjectGroupMetadata",
            Self::OBJECT_GROUP_METADATA_DECLARATIONS => "ObjectGroupMetadataDeclarations",
            _ => return None,
        })
    }
}

impl fmt::Debug for StreamObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for StreamObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({:#04x})", self.0),
            None => write!(f, "StreamObject({:#04x})", self.0),
        }
    }
}

const LENGTH_ESCAPE: u64 = 0x7FFF;

/// Start header of a stream object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamObjectHeader {
    pub kind: StreamObjectType,
    pub compound: bool,
    /// Byte length of the object's own fields. Zero for compound objects.
    pub length: u64,
}

impl StreamObjectHeader {
    pub fn new(kind: StreamObjectType, compound: bool, length: u64) -> Self {
        Self { kind, compound, length }
    }

    /// Read a start header. An end header in this position is an error.
    pub fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let offset = cursor.offset();
        let first = cursor.peek_u8()?;
        match first & 0b11 {
            0 => {
                let mut bits = BitReader::with_base(cursor.read_bytes(2)?, offset);
                bits.read_uint(2)?;
                let compound = bits.read_bool()?;
                let kind = StreamObjectType(bits.read_uint(6)? as u16);
                let length = bits.read_uint(7)?;
                Ok(Self { kind, compound, length })
            }
            2 => {
                let mut bits = BitReader::with_base(cursor.read_bytes(4)?, offset);
                bits.read_uint(2)?;
                let compound = bits.read_bool()?;
                let kind = StreamObjectType(bits.read_uint(14)? as u16);
                let mut length = bits.read_uint(15)?;
                if length == LENGTH_ESCAPE {
                    length = read_compact_u64(cursor)?;
                }
                Ok(Self { kind, compound, length })
            }
            _ => Err(GraphError::framing(
                offset,
                "expected a stream object start, found an end header",
            )),
        }
    }

    /// Write the header in the smallest form that holds it.
    pub fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        let mut bits = BitWriter::new();
        if self.kind.0 < 1 << 6 && self.length < 1 << 7 {
            bits.append_uint(0, 2)?;
            bits.append_bool(self.compound)?;
            bits.append_uint(self.kind.0 as u64, 6)?;
            bits.append_uint(self.length, 7)?;
            writer.put_bytes(&bits.finish());
        } else {
            bits.append_uint(2, 2)?;
            bits.append_bool(self.compound)?;
            bits.append_uint(self.kind.0 as u64, 14)?;
            bits.append_uint(self.length.min(LENGTH_ESCAPE), 15)?;
            writer.put_bytes(&bits.finish());
            if self.length >= LENGTH_ESCAPE {
                write_compact_u64(writer, self.length);
            }
        }
        Ok(())
    }
}

/// Whether the next header in the cursor is an end header.
pub fn at_end(cursor: &ByteCursor<'_>) -> bool {
    matches!(cursor.peek_u8(), Ok(b) if b & 1 == 1)
}

/// Peek at the next start header without consuming it.
pub fn peek_start(cursor: &ByteCursor<'_>) -> Option<StreamObjectHeader> {
    if at_end(cursor) {
        return None;
    }
    StreamObjectHeader::read(&mut cursor.clone()).ok()
}

pub fn read_end(cursor: &mut ByteCursor<'_>) -> GraphResult<StreamObjectType> {
    let offset = cursor.offset();
    let first = cursor.peek_u8()?;
    let (len, width) = match first & 0b11 {
        1 => (1, 6),
        3 => (2, 14),
        _ => {
            return Err(GraphError::framing(
                offset,
                "expected a stream object end, found a start header",
            ))
        }
    };
    let mut bits = BitReader::with_base(cursor.read_bytes(len)?, offset);
    bits.read_uint(2)?;
    Ok(StreamObjectType(bits.read_uint(width)? as u16))
}

pub fn write_end(kind: StreamObjectType, writer: &mut ByteWriter) -> GraphResult<()> {
    let mut bits = BitWriter::new();
    if kind.0 < 1 << 6 {
        bits.append_uint(1, 2)?;
        bits.append_uint(kind.0 as u64, 6)?;
    } else {
        bits.append_uint(3, 2)?;
        bits.append_uint(kind.0 as u64, 14)?;
    }
    writer.put_bytes(&bits.finish());
    Ok(())
}

/// Read a start header and check its type.
pub fn expect_start(
    cursor: &mut ByteCursor<'_>,
    kind: StreamObjectType,
) -> GraphResult<StreamObjectHeader> {
    let offset = cursor.offset();
    let header = StreamObjectHeader::read(cursor)?;
    if header.kind != kind {
        return Err(GraphError::UnexpectedStreamObject {
            offset,
            expected: kind,
            actual: header.kind,
        });
    }
    Ok(header)
}

/// Read an end header and check its type.
pub fn expect_end(cursor: &mut ByteCursor<'_>, kind: StreamObjectType) -> GraphResult<()> {
    let offset = cursor.offset();
    let actual = read_end(cursor)?;
    if actual != kind {
        return Err(GraphError::UnexpectedStreamObject {
            offset,
            expected: kind,
            actual,
        });
    }
    Ok(())
}

/// Read a non-compound object of type `kind` and hand its fields to `f`.
/// `f` must consume exactly the declared length.
pub fn read_object<'a, T>(
    cursor: &mut ByteCursor<'a>,
    kind: StreamObjectType,
    f: impl FnOnce(&mut ByteCursor<'a>) -> GraphResult<T>,
) -> GraphResult<T> {
    let offset = cursor.offset();
    let header = expect_start(cursor, kind)?;
    if header.compound {
        return Err(GraphError::framing(offset, format!("{kind} must not be compound")));
    }
    read_fields(cursor, header, f)
}

/// Read the start of a compound object and its own fields. The children and
/// the end header are left for the caller.
pub fn read_compound_start<'a, T>(
    cursor: &mut ByteCursor<'a>,
    kind: StreamObjectType,
    f: impl FnOnce(&mut ByteCursor<'a>) -> GraphResult<T>,
) -> GraphResult<T> {
    let offset = cursor.offset();
    let header = expect_start(cursor, kind)?;
    if !header.compound {
        return Err(GraphError::framing(offset, format!("{kind} must be compound")));
    }
    read_fields(cursor, header, f)
}

fn read_fields<'a, T>(
    cursor: &mut ByteCursor<'a>,
    header: StreamObjectHeader,
    f: impl FnOnce(&mut ByteCursor<'a>) -> GraphResult<T>,
) -> GraphResult<T> {
    let offset = cursor.offset();
    let kind = header.kind;
    let len = usize::try_from(header.length).map_err(|_| {
        GraphError::framing(offset, format!("{kind} length {} is too large", header.length))
    })?;
    let mut body = cursor.sub_cursor(len)?;
    let value = f(&mut body)?;
    if !body.is_empty() {
        return Err(GraphError::framing(
            body.offset(),
            format!("{kind} declares {len} bytes but {} are unused", body.remaining()),
        ));
    }
    Ok(value)
}

/// Write a non-compound object whose fields are produced by `f`.
pub fn write_object(
    writer: &mut ByteWriter,
    kind: StreamObjectType,
    f: impl FnOnce(&mut ByteWriter) -> GraphResult<()>,
) -> GraphResult<()> {
    let mut body = ByteWriter::new();
    f(&mut body)?;
    StreamObjectHeader::new(kind, false, body.len() as u64).write(writer)?;
    writer.put_bytes(&body.into_inner());
    Ok(())
}

/// Write a compound object: start header covering the fields from `fields`,
/// the children from `children`, then the end header.
pub fn write_compound(
    writer: &mut ByteWriter,
    kind: StreamObjectType,
    fields: impl FnOnce(&mut ByteWriter) -> GraphResult<()>,
    children: impl FnOnce(&mut ByteWriter) -> GraphResult<()>,
) -> GraphResult<()> {
    let mut own = ByteWriter::new();
    fields(&mut own)?;
    StreamObjectHeader::new(kind, true, own.len() as u64).write(writer)?;
    writer.put_bytes(&own.into_inner());
    children(writer)?;
    write_end(kind, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(header: StreamObjectHeader) -> (Vec<u8>, StreamObjectHeader) {
        let mut w = ByteWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.into_inner();
        let back = StreamObjectHeader::read(&mut ByteCursor::new(&bytes)).unwrap();
        (bytes, back)
    }

    #[test]
    fn short_header_layout() {
        let header =
            StreamObjectHeader::new(StreamObjectType::STORAGE_INDEX_CELL_MAPPING, false, 0x25);
        let (bytes, back) = roundtrip(header);
        assert_eq!(bytes.len(), 2);
        let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(raw & 0b11, 0);
        assert_eq!((raw >> 3) & 0x3F, 0x0E);
        assert_eq!(raw >> 9, 0x25);
        assert_eq!(back.length, 0x25);
    }

    #[test]
    fn long_header_for_large_length() {
        let header =
            StreamObjectHeader::new(StreamObjectType::OBJECT_GROUP_OBJECT_DATA, false, 300);
        let (bytes, back) = roundtrip(header);
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0] & 0b11, 2);
        assert_eq!(back.length, 300);
    }

    #[test]
    fn escaped_length() {
        let header = StreamObjectHeader::new(StreamObjectType::OBJECT_DATA_BLOB, false, 100_000);
        let (bytes, back) = roundtrip(header);
        assert!(bytes.len() > 4);
        assert_eq!(back.length, 100_000);
    }

    #[test]
    fn end_headers() {
        let mut w = ByteWriter::new();
        write_end(StreamObjectType::DATA_ELEMENT, &mut w).unwrap();
        write_end(StreamObjectType(0x79), &mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 3);
        let mut c = ByteCursor::new(&bytes);
        assert!(at_end(&c));
        assert_eq!(read_end(&mut c).unwrap(), StreamObjectType::DATA_ELEMENT);
        assert_eq!(read_end(&mut c).unwrap(), StreamObjectType(0x79));
    }

    #[test]
    fn unexpected_type_is_reported() {
        let mut w = ByteWriter::new();
        StreamObjectHeader::new(StreamObjectType::REVISION_MANIFEST, false, 0)
            .write(&mut w)
            .unwrap();
        let bytes = w.into_inner();
        let mut cursor = ByteCursor::with_base(&bytes, 40);
        let expected = StreamObjectType::CELL_MANIFEST_CURRENT_REVISION;
        let err = expect_start(&mut cursor, expected).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnexpectedStreamObject {
                offset: 40,
                expected: StreamObjectType::CELL_MANIFEST_CURRENT_REVISION,
                actual: StreamObjectType::REVISION_MANIFEST,
            }
        ));
    }

    #[test]
    fn object_with_unused_bytes_is_framing_error() {
        let mut w = ByteWriter::new();
        write_object(&mut w, StreamObjectType::CELL_MANIFEST_CURRENT_REVISION, |b| {
            b.put_u32(7);
            Ok(())
        })
        .unwrap();
        let bytes = w.into_inner();
        let kind = StreamObjectType::CELL_MANIFEST_CURRENT_REVISION;
        let err =
            read_object(&mut ByteCursor::new(&bytes), kind, |c| Ok(c.read_u16()?)).unwrap_err();
        assert!(matches!(err, GraphError::MalformedFraming { .. }));
    }

    proptest! {
        #[test]
        fn header_roundtrip(kind in 0u16..0x4000, compound: bool, length in 0u64..1_000_000) {
            let header = StreamObjectHeader::new(StreamObjectType(kind), compound, length);
            let (_, back) = roundtrip(header);
            prop_assert_eq!(back, header);
        }
    }
}
