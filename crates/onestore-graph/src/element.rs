//! Data elements and the data element package.
//!
//! A package is a compound stream object holding a flat sequence of data
//! elements. Each element carries an id, a serial number and a type, and its
//! body is a run of typed stream objects:
//!
//! | Element          | Body                                                      |
//! |------------------|-----------------------------------------------------------|
//! | storage index    | manifest, cell and revision mappings                      |
//! | storage manifest | schema GUID, root declarations                            |
//! | cell manifest    | current revision                                          |
//! | revision manifest| revision ids, root declarations, object group references |
//! | object group     | declarations, optional metadata, data                     |
//! | object data BLOB | raw bytes                                                 |

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use onestore_types::{
    read_compact_u64, write_compact_u64, ByteCursor, ByteWriter, CellId, ExtendedGuid, SerialNumber,
    TypeError,
};

use crate::error::{GraphError, GraphResult};
use crate::stream::{
    at_end, expect_end, peek_start, read_compound_start, read_object, write_compound, write_object,
    StreamObjectHeader, StreamObjectType,
};

type Sot = StreamObjectType;

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataElementType {
    StorageIndex,
    StorageManifest,
    CellManifest,
    RevisionManifest,
    ObjectGroup,
    ObjectDataBlob,
}

impl DataElementType {
    pub fn from_u64(value: u64) -> Option<Self> {
        Some(match value {
            0x01 => Self::StorageIndex,
            0x02 => Self::StorageManifest,
            0x03 => Self::CellManifest,
            0x04 => Self::RevisionManifest,
            0x05 => Self::ObjectGroup,
            0x0A => Self::ObjectDataBlob,
            _ => return None,
        })
    }

    pub fn to_u64(self) -> u64 {
        match self {
            Self::StorageIndex => 0x01,
            Self::StorageManifest => 0x02,
            Self::CellManifest => 0x03,
            Self::RevisionManifest => 0x04,
            Self::ObjectGroup => 0x05,
            Self::ObjectDataBlob => 0x0A,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage index
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIndexManifestMapping {
    pub mapping_id: ExtendedGuid,
    pub serial: SerialNumber,
}

/// Maps a cell to the cell manifest element that describes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIndexCellMapping {
    pub cell_id: CellId,
    pub mapping_id: ExtendedGuid,
    pub serial: SerialNumber,
}

/// Maps a revision to the revision manifest element that describes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIndexRevisionMapping {
    pub revision_id: ExtendedGuid,
    pub mapping_id: ExtendedGuid,
    pub serial: SerialNumber,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageIndex {
    pub manifest_mappings: Vec<StorageIndexManifestMapping>,
    pub cell_mappings: Vec<StorageIndexCellMapping>,
    pub revision_mappings: Vec<StorageIndexRevisionMapping>,
}

impl StorageIndex {
    fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let mut index = Self::default();
        while !at_end(cursor) {
            match next_kind(cursor)? {
                Sot::STORAGE_INDEX_MANIFEST_MAPPING => {
                    let record = read_object(cursor, Sot::STORAGE_INDEX_MANIFEST_MAPPING, |c| {
                        Ok(StorageIndexManifestMapping {
                            mapping_id: ExtendedGuid::read_compact(c)?,
                            serial: SerialNumber::read_compact(c)?,
                        })
                    })?;
                    index.manifest_mappings.push(record);
                }
                Sot::STORAGE_INDEX_CELL_MAPPING => {
                    let record = read_object(cursor, Sot::STORAGE_INDEX_CELL_MAPPING, |c| {
                        Ok(StorageIndexCellMapping {
                            cell_id: CellId::read_compact(c)?,
                            mapping_id: ExtendedGuid::read_compact(c)?,
                            serial: SerialNumber::read_compact(c)?,
                        })
                    })?;
                    index.cell_mappings.push(record);
                }
                Sot::STORAGE_INDEX_REVISION_MAPPING => {
                    let record = read_object(cursor, Sot::STORAGE_INDEX_REVISION_MAPPING, |c| {
                        Ok(StorageIndexRevisionMapping {
                            revision_id: ExtendedGuid::read_compact(c)?,
                            mapping_id: ExtendedGuid::read_compact(c)?,
                            serial: SerialNumber::read_compact(c)?,
                        })
                    })?;
                    index.revision_mappings.push(record);
                }
                other => return Err(unexpected_child(cursor, "storage index", other)),
            }
        }
        Ok(index)
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        for m in &self.manifest_mappings {
            write_object(writer, Sot::STORAGE_INDEX_MANIFEST_MAPPING, |w| {
                m.mapping_id.write_compact(w);
                m.serial.write_compact(w);
                Ok(())
            })?;
        }
        for m in &self.cell_mappings {
            write_object(writer, Sot::STORAGE_INDEX_CELL_MAPPING, |w| {
                m.cell_id.write_compact(w);
                m.mapping_id.write_compact(w);
                m.serial.write_compact(w);
                Ok(())
            })?;
        }
        for m in &self.revision_mappings {
            write_object(writer, Sot::STORAGE_INDEX_REVISION_MAPPING, |w| {
                m.revision_id.write_compact(w);
                m.mapping_id.write_compact(w);
                m.serial.write_compact(w);
                Ok(())
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Storage manifest
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageManifestRootDeclare {
    pub root_id: ExtendedGuid,
    pub cell_id: CellId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageManifest {
    pub schema_guid: Uuid,
    pub roots: Vec<StorageManifestRootDeclare>,
}

impl StorageManifest {
    fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let schema_guid =
            read_object(cursor, Sot::STORAGE_MANIFEST_SCHEMA_GUID, |c| Ok(c.read_guid()?))?;
        let mut roots = Vec::new();
        while !at_end(cursor) {
            roots.push(read_object(cursor, Sot::STORAGE_MANIFEST_ROOT_DECLARE, |c| {
                Ok(StorageManifestRootDeclare {
                    root_id: ExtendedGuid::read_compact(c)?,
                    cell_id: CellId::read_compact(c)?,
                })
            })?);
        }
        Ok(Self { schema_guid, roots })
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        write_object(writer, Sot::STORAGE_MANIFEST_SCHEMA_GUID, |w| {
            w.put_guid(&self.schema_guid);
            Ok(())
        })?;
        for root in &self.roots {
            write_object(writer, Sot::STORAGE_MANIFEST_ROOT_DECLARE, |w| {
                root.root_id.write_compact(w);
                root.cell_id.write_compact(w);
                Ok(())
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cell and revision manifests
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellManifest {
    pub current_revision: ExtendedGuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionManifestRootDeclare {
    pub root_id: ExtendedGuid,
    pub object_id: ExtendedGuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionManifest {
    pub revision_id: ExtendedGuid,
    /// Nil when this revision has no predecessor.
    pub base_revision_id: ExtendedGuid,
    pub root_declares: Vec<RevisionManifestRootDeclare>,
    pub object_group_references: Vec<ExtendedGuid>,
}

impl RevisionManifest {
    fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let (revision_id, base_revision_id) = read_object(cursor, Sot::REVISION_MANIFEST, |c| {
            Ok((ExtendedGuid::read_compact(c)?, ExtendedGuid::read_compact(c)?))
        })?;
        let mut manifest = Self {
            revision_id,
            base_revision_id,
            root_declares: Vec::new(),
            object_group_references: Vec::new(),
        };
        while !at_end(cursor) {
            match next_kind(cursor)? {
                Sot::REVISION_MANIFEST_ROOT_DECLARE => {
                    let record = read_object(cursor, Sot::REVISION_MANIFEST_ROOT_DECLARE, |c| {
                        Ok(RevisionManifestRootDeclare {
                            root_id: ExtendedGuid::read_compact(c)?,
                            object_id: ExtendedGuid::read_compact(c)?,
                        })
                    })?;
                    manifest.root_declares.push(record);
                }
                Sot::REVISION_MANIFEST_OBJECT_GROUP_REFERENCES => {
                    let group_id =
                        read_object(cursor, Sot::REVISION_MANIFEST_OBJECT_GROUP_REFERENCES, |c| {
                            Ok(ExtendedGuid::read_compact(c)?)
                        })?;
                    manifest.object_group_references.push(group_id);
                }
                other => return Err(unexpected_child(cursor, "revision manifest", other)),
            }
        }
        Ok(manifest)
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        write_object(writer, Sot::REVISION_MANIFEST, |w| {
            self.revision_id.write_compact(w);
            self.base_revision_id.write_compact(w);
            Ok(())
        })?;
        for root in &self.root_declares {
            write_object(writer, Sot::REVISION_MANIFEST_ROOT_DECLARE, |w| {
                root.root_id.write_compact(w);
                root.object_id.write_compact(w);
                Ok(())
            })?;
        }
        for group in &self.object_group_references {
            write_object(writer, Sot::REVISION_MANIFEST_OBJECT_GROUP_REFERENCES, |w| {
                group.write_compact(w);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// The object declared under `root_id`, if any.
    pub fn root_object(&self, root_id: &ExtendedGuid) -> Option<ExtendedGuid> {
        self.root_declares
            .iter()
            .find(|r| &r.root_id == root_id)
            .map(|r| r.object_id)
    }
}

// ---------------------------------------------------------------------------
// Object groups
// ---------------------------------------------------------------------------

/// Declares one partition of an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDeclaration {
    pub object_id: ExtendedGuid,
    pub partition: u64,
    pub data_size: u64,
    pub object_refs_count: u64,
    pub cell_refs_count: u64,
}

/// Declares a partition whose bytes live in a separate object data BLOB.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDeclaration {
    pub object_id: ExtendedGuid,
    pub blob_id: ExtendedGuid,
    pub partition: u64,
    pub object_refs_count: u64,
    pub cell_refs_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectGroupDeclaration {
    Object(ObjectDeclaration),
    Blob(BlobDeclaration),
}

impl ObjectGroupDeclaration {
    pub fn object_id(&self) -> ExtendedGuid {
        match self {
            Self::Object(d) => d.object_id,
            Self::Blob(d) => d.object_id,
        }
    }

    pub fn partition(&self) -> u64 {
        match self {
            Self::Object(d) => d.partition,
            Self::Blob(d) => d.partition,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectData {
    pub object_ids: Vec<ExtendedGuid>,
    pub cell_ids: Vec<CellId>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobReference {
    pub object_ids: Vec<ExtendedGuid>,
    pub cell_ids: Vec<CellId>,
    pub blob_id: ExtendedGuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectGroupData {
    Object(ObjectData),
    BlobReference(BlobReference),
}

impl ObjectGroupData {
    pub fn object_ids(&self) -> &[ExtendedGuid] {
        match self {
            Self::Object(d) => &d.object_ids,
            Self::BlobReference(d) => &d.object_ids,
        }
    }

    pub fn cell_ids(&self) -> &[CellId] {
        match self {
            Self::Object(d) => &d.cell_ids,
            Self::BlobReference(d) => &d.cell_ids,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectGroup {
    pub declarations: Vec<ObjectGroupDeclaration>,
    /// Object change frequencies, when the group carries a metadata section.
    pub metadata: Option<Vec<u64>>,
    pub data: Vec<ObjectGroupData>,
}

impl ObjectGroup {
    fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let mut group = Self::default();

        read_compound_start(cursor, Sot::OBJECT_GROUP_DECLARATIONS, |_| Ok(()))?;
        while !at_end(cursor) {
            let declaration = match next_kind(cursor)? {
                Sot::OBJECT_GROUP_OBJECT_DECLARE => {
                    let declaration = read_object(cursor, Sot::OBJECT_GROUP_OBJECT_DECLARE, |c| {
                        Ok(ObjectDeclaration {
                            object_id: ExtendedGuid::read_compact(c)?,
                            partition: read_compact_u64(c)?,
                            data_size: read_compact_u64(c)?,
                            object_refs_count: read_compact_u64(c)?,
                            cell_refs_count: read_compact_u64(c)?,
                        })
                    })?;
                    ObjectGroupDeclaration::Object(declaration)
                }
                Sot::OBJECT_GROUP_OBJECT_BLOB_DATA_DECLARATION => {
                    let declaration =
                        read_object(cursor, Sot::OBJECT_GROUP_OBJECT_BLOB_DATA_DECLARATION, |c| {
                            Ok(BlobDeclaration {
                                object_id: ExtendedGuid::read_compact(c)?,
                                blob_id: ExtendedGuid::read_compact(c)?,
                                partition: read_compact_u64(c)?,
                                object_refs_count: read_compact_u64(c)?,
                                cell_refs_count: read_compact_u64(c)?,
                            })
                        })?;
                    ObjectGroupDeclaration::Blob(declaration)
                }
                other => return Err(unexpected_child(cursor, "object group declarations", other)),
            };
            group.declarations.push(declaration);
        }
        expect_end(cursor, Sot::OBJECT_GROUP_DECLARATIONS)?;

        if peek_start(cursor).map(|h| h.kind) == Some(Sot::OBJECT_GROUP_METADATA_DECLARATIONS) {
            read_compound_start(cursor, Sot::OBJECT_GROUP_METADATA_DECLARATIONS, |_| Ok(()))?;
            let mut frequencies = Vec::new();
            while !at_end(cursor) {
                let frequency =
                    read_object(cursor, Sot::OBJECT_GROUP_METADATA, |c| Ok(read_compact_u64(c)?))?;
                frequencies.push(frequency);
            }
            expect_end(cursor, Sot::OBJECT_GROUP_METADATA_DECLARATIONS)?;
            group.metadata = Some(frequencies);
        }

        read_compound_start(cursor, Sot::OBJECT_GROUP_DATA, |_| Ok(()))?;
        while !at_end(cursor) {
            let data = match next_kind(cursor)? {
                Sot::OBJECT_GROUP_OBJECT_DATA => {
                    let record = read_object(cursor, Sot::OBJECT_GROUP_OBJECT_DATA, |c| {
                        Ok(ObjectData {
                            object_ids: ExtendedGuid::read_compact_array(c)?,
                            cell_ids: CellId::read_compact_array(c)?,
                            data: read_binary_item(c)?,
                        })
                    })?;
                    ObjectGroupData::Object(record)
                }
                Sot::OBJECT_GROUP_OBJECT_DATA_BLOB_REFERENCE => {
                    let reference =
                        read_object(cursor, Sot::OBJECT_GROUP_OBJECT_DATA_BLOB_REFERENCE, |c| {
                            Ok(BlobReference {
                                object_ids: ExtendedGuid::read_compact_array(c)?,
                                cell_ids: CellId::read_compact_array(c)?,
                                blob_id: ExtendedGuid::read_compact(c)?,
                            })
                        })?;
                    ObjectGroupData::BlobReference(reference)
                }
                other => return Err(unexpected_child(cursor, "object group data", other)),
            };
            group.data.push(data);
        }
        expect_end(cursor, Sot::OBJECT_GROUP_DATA)?;
        Ok(group)
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        write_compound(writer, Sot::OBJECT_GROUP_DECLARATIONS, |_| Ok(()), |w| {
            for declaration in &self.declarations {
                match declaration {
                    ObjectGroupDeclaration::Object(d) => {
                        write_object(w, Sot::OBJECT_GROUP_OBJECT_DECLARE, |b| {
                            d.object_id.write_compact(b);
                            write_compact_u64(b, d.partition);
                            write_compact_u64(b, d.data_size);
                            write_compact_u64(b, d.object_refs_count);
                            write_compact_u64(b, d.cell_refs_count);
                            Ok(())
                        })?
                    }
                    ObjectGroupDeclaration::Blob(d) => {
                        write_object(w, Sot::OBJECT_GROUP_OBJECT_BLOB_DATA_DECLARATION, |b| {
                            d.object_id.write_compact(b);
                            d.blob_id.write_compact(b);
                            write_compact_u64(b, d.partition);
                            write_compact_u64(b, d.object_refs_count);
                            write_compact_u64(b, d.cell_refs_count);
                            Ok(())
                        })?
                    }
                }
            }
            Ok(())
        })?;

        if let Some(frequencies) = &self.metadata {
            write_compound(writer, Sot::OBJECT_GROUP_METADATA_DECLARATIONS, |_| Ok(()), |w| {
                for &frequency in frequencies {
                    write_object(w, Sot::OBJECT_GROUP_METADATA, |b| {
                        write_compact_u64(b, frequency);
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
        }

        write_compound(writer, Sot::OBJECT_GROUP_DATA, |_| Ok(()), |w| {
            for data in &self.data {
                match data {
                    ObjectGroupData::Object(d) => {
                        write_object(w, Sot::OBJECT_GROUP_OBJECT_DATA, |b| {
                            ExtendedGuid::write_compact_array(&d.object_ids, b);
                            CellId::write_compact_array(&d.cell_ids, b);
                            write_compact_u64(b, d.data.len() as u64);
                            b.put_bytes(&d.data);
                            Ok(())
                        })?
                    }
                    ObjectGroupData::BlobReference(d) => {
                        write_object(w, Sot::OBJECT_GROUP_OBJECT_DATA_BLOB_REFERENCE, |b| {
                            ExtendedGuid::write_compact_array(&d.object_ids, b);
                            CellId::write_compact_array(&d.cell_ids, b);
                            d.blob_id.write_compact(b);
                            Ok(())
                        })?
                    }
                }
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Data elements
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataElementBody {
    StorageIndex(StorageIndex),
    StorageManifest(StorageManifest),
    CellManifest(CellManifest),
    RevisionManifest(RevisionManifest),
    ObjectGroup(ObjectGroup),
    ObjectDataBlob(Vec<u8>),
}

impl DataElementBody {
    pub fn kind(&self) -> DataElementType {
        match self {
            Self::StorageIndex(_) => DataElementType::StorageIndex,
            Self::StorageManifest(_) => DataElementType::StorageManifest,
            Self::CellManifest(_) => DataElementType::CellManifest,
            Self::RevisionManifest(_) => DataElementType::RevisionManifest,
            Self::ObjectGroup(_) => DataElementType::ObjectGroup,
            Self::ObjectDataBlob(_) => DataElementType::ObjectDataBlob,
        }
    }

    fn read(kind: DataElementType, cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        Ok(match kind {
            DataElementType::StorageIndex => Self::StorageIndex(StorageIndex::read(cursor)?),
            DataElementType::StorageManifest => {
                Self::StorageManifest(StorageManifest::read(cursor)?)
            }
            DataElementType::CellManifest => Self::CellManifest(read_object(
                cursor,
                Sot::CELL_MANIFEST_CURRENT_REVISION,
                |c| {
                    Ok(CellManifest {
                        current_revision: ExtendedGuid::read_compact(c)?,
                    })
                },
            )?),
            DataElementType::RevisionManifest => {
                Self::RevisionManifest(RevisionManifest::read(cursor)?)
            }
            DataElementType::ObjectGroup => Self::ObjectGroup(ObjectGroup::read(cursor)?),
            DataElementType::ObjectDataBlob => {
                let data = read_object(cursor, Sot::OBJECT_DATA_BLOB, |c| {
                    Ok(c.read_bytes(c.remaining())?.to_vec())
                })?;
                Self::ObjectDataBlob(data)
            }
        })
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        match self {
            Self::StorageIndex(b) => b.write(writer),
            Self::StorageManifest(b) => b.write(writer),
            Self::CellManifest(b) => write_object(writer, Sot::CELL_MANIFEST_CURRENT_REVISION, |w| {
                b.current_revision.write_compact(w);
                Ok(())
            }),
            Self::RevisionManifest(b) => b.write(writer),
            Self::ObjectGroup(b) => b.write(writer),
            Self::ObjectDataBlob(bytes) => write_object(writer, Sot::OBJECT_DATA_BLOB, |w| {
                w.put_bytes(bytes);
                Ok(())
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
    pub id: ExtendedGuid,
    pub serial: SerialNumber,
    pub body: DataElementBody,
}

impl DataElement {
    pub fn new(id: ExtendedGuid, body: DataElementBody) -> Self {
        Self {
            id,
            serial: SerialNumber::default(),
            body,
        }
    }

    pub fn kind(&self) -> DataElementType {
        self.body.kind()
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let offset = cursor.offset();
        let (id, serial, raw_kind) = read_compound_start(cursor, Sot::DATA_ELEMENT, |c| {
            Ok((
                ExtendedGuid::read_compact(c)?,
                SerialNumber::read_compact(c)?,
                read_compact_u64(c)?,
            ))
        })?;
        let kind = DataElementType::from_u64(raw_kind).ok_or_else(|| {
            GraphError::framing(offset, format!("unknown data element type {raw_kind:#x}"))
        })?;
        trace!(offset, %id, ?kind, "data element");
        let body = DataElementBody::read(kind, cursor)?;
        expect_end(cursor, Sot::DATA_ELEMENT)?;
        Ok(Self { id, serial, body })
    }

    pub fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        write_compound(
            writer,
            Sot::DATA_ELEMENT,
            |w| {
                self.id.write_compact(w);
                self.serial.write_compact(w);
                write_compact_u64(w, self.kind().to_u64());
                Ok(())
            },
            |w| self.body.write(w),
        )
    }
}

/// The top-level container of data elements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElementPackage {
    pub reserved: u8,
    pub elements: Vec<DataElement>,
}

impl DataElementPackage {
    pub fn new(elements: Vec<DataElement>) -> Self {
        Self { reserved: 0, elements }
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let reserved =
            read_compound_start(cursor, Sot::DATA_ELEMENT_PACKAGE, |c| Ok(c.read_u8()?))?;
        let mut elements = Vec::new();
        while !at_end(cursor) {
            elements.push(DataElement::read(cursor)?);
        }
        expect_end(cursor, Sot::DATA_ELEMENT_PACKAGE)?;
        trace!(elements = elements.len(), "data element package");
        Ok(Self { reserved, elements })
    }

    /// Decode a package that fills `bytes` exactly.
    pub fn decode(bytes: &[u8]) -> GraphResult<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let package = Self::read(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(GraphError::framing(
                cursor.offset(),
                format!("{} trailing bytes after data element package", cursor.remaining()),
            ));
        }
        Ok(package)
    }

    pub fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        write_compound(
            writer,
            Sot::DATA_ELEMENT_PACKAGE,
            |w| {
                w.put_u8(self.reserved);
                Ok(())
            },
            |w| {
                for element in &self.elements {
                    element.write(w)?;
                }
                Ok(())
            },
        )
    }

    pub fn encode(&self) -> GraphResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn next_kind(cursor: &ByteCursor<'_>) -> GraphResult<StreamObjectType> {
    Ok(StreamObjectHeader::read(&mut cursor.clone())?.kind)
}

fn unexpected_child(cursor: &ByteCursor<'_>, parent: &str, kind: StreamObjectType) -> GraphError {
    GraphError::framing(cursor.offset(), format!("unexpected {kind} in {parent}"))
}

/// A compact length followed by that many bytes.
fn read_binary_item(cursor: &mut ByteCursor<'_>) -> GraphResult<Vec<u8>> {
    let offset = cursor.offset();
    let len = read_compact_u64(cursor)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= cursor.remaining())
        .ok_or_else(|| {
            GraphError::Type(TypeError::TruncatedInput {
                offset,
                needed: len,
                available: cursor.remaining() as u64,
            })
        })?;
    Ok(cursor.read_bytes(len)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xg(v: u128, n: u32) -> ExtendedGuid {
        ExtendedGuid::new(Uuid::from_u128(v), n)
    }

    fn roundtrip(element: DataElement) -> DataElement {
        let bytes = DataElementPackage::new(vec![element]).encode().unwrap();
        let mut package = DataElementPackage::decode(&bytes).unwrap();
        assert_eq!(package.encode().unwrap(), bytes);
        package.elements.remove(0)
    }

    // -----------------------------------------------------------------------
    // Element bodies
    // -----------------------------------------------------------------------

    #[test]
    fn storage_index_mappings() {
        let element = DataElement::new(
            xg(1, 1),
            DataElementBody::StorageIndex(StorageIndex {
                manifest_mappings: vec![StorageIndexManifestMapping {
                    mapping_id: xg(2, 1),
                    serial: SerialNumber::new(Uuid::from_u128(9), 4),
                }],
                cell_mappings: vec![StorageIndexCellMapping {
                    cell_id: CellId::new(xg(3, 1), xg(3, 2)),
                    mapping_id: xg(4, 1),
                    serial: SerialNumber::default(),
                }],
                revision_mappings: vec![StorageIndexRevisionMapping {
                    revision_id: xg(5, 1),
                    mapping_id: xg(6, 1),
                    serial: SerialNumber::default(),
                }],
            }),
        );
        assert_eq!(roundtrip(element.clone()), element);
    }

    #[test]
    fn revision_manifest_with_roots_and_groups() {
        let element = DataElement::new(
            xg(1, 7),
            DataElementBody::RevisionManifest(RevisionManifest {
                revision_id: xg(10, 1),
                base_revision_id: ExtendedGuid::nil(),
                root_declares: vec![RevisionManifestRootDeclare {
                    root_id: xg(11, 2),
                    object_id: xg(12, 3),
                }],
                object_group_references: vec![xg(13, 1), xg(13, 2)],
            }),
        );
        let back = roundtrip(element.clone());
        assert_eq!(back, element);
        if let DataElementBody::RevisionManifest(m) = &back.body {
            assert_eq!(m.root_object(&xg(11, 2)), Some(xg(12, 3)));
            assert_eq!(m.root_object(&xg(11, 3)), None);
        }
    }

    #[test]
    fn object_group_with_metadata_and_blob() {
        let element = DataElement::new(
            xg(20, 1),
            DataElementBody::ObjectGroup(ObjectGroup {
                declarations: vec![
                    ObjectGroupDeclaration::Object(ObjectDeclaration {
                        object_id: xg(21, 1),
                        partition: 1,
                        data_size: 3,
                        object_refs_count: 1,
                        cell_refs_count: 0,
                    }),
                    ObjectGroupDeclaration::Blob(BlobDeclaration {
                        object_id: xg(22, 1),
                        blob_id: xg(23, 1),
                        partition: 2,
                        object_refs_count: 0,
                        cell_refs_count: 0,
                    }),
                ],
                metadata: Some(vec![1, 300]),
                data: vec![
                    ObjectGroupData::Object(ObjectData {
                        object_ids: vec![xg(21, 5)],
                        cell_ids: vec![],
                        data: vec![1, 2, 3],
                    }),
                    ObjectGroupData::BlobReference(BlobReference {
                        object_ids: vec![],
                        cell_ids: vec![],
                        blob_id: xg(23, 1),
                    }),
                ],
            }),
        );
        assert_eq!(roundtrip(element.clone()), element);
    }

    #[test]
    fn large_blob_uses_extended_length() {
        let element =
            DataElement::new(xg(30, 1), DataElementBody::ObjectDataBlob(vec![0xAB; 40_000]));
        assert_eq!(roundtrip(element.clone()), element);
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_element_type_is_rejected() {
        let mut w = ByteWriter::new();
        write_compound(
            &mut w,
            Sot::DATA_ELEMENT,
            |b| {
                xg(1, 1).write_compact(b);
                SerialNumber::default().write_compact(b);
                write_compact_u64(b, 0x3F);
                Ok(())
            },
            |_| Ok(()),
        )
        .unwrap();
        let bytes = w.into_inner();
        let err = DataElement::read(&mut ByteCursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, GraphError::MalformedFraming { offset: 0, .. }));
    }

    #[test]
    fn truncated_package_is_reported() {
        let bytes = DataElementPackage::new(vec![DataElement::new(
            xg(1, 1),
            DataElementBody::CellManifest(CellManifest {
                current_revision: xg(2, 2),
            }),
        )])
        .encode()
        .unwrap();
        let err = DataElementPackage::decode(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(err.is_truncated(), "{err}");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = DataElementPackage::default().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            DataElementPackage::decode(&bytes),
            Err(GraphError::MalformedFraming { .. })
        ));
    }
}
