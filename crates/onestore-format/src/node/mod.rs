//! File nodes: the records that make up a file node list.
//!
//! A node is a 4-byte packed header followed by a body whose layout depends
//! on the node kind. The header's `size` field covers header and body and is
//! authoritative: a recognized body must fill it exactly.
//!
//! # Key Types
//!
//! - [`FileNodeId`] - 10-bit node kind with named constants
//! - [`FileNodeHeader`] - the packed 32-bit header
//! - [`FileNodeBody`] - closed sum over recognized kinds, plus `Unknown`
//! - [`FileNode`] - header and body together

pub mod body;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use uuid::Uuid;

use onestore_types::{
    BitReader, BitWriter, ByteCursor, ByteWriter, CompactId, ExtendedGuid, TypeError,
};

use crate::chunk::{CbFormat, ChunkReference, StpFormat};
use crate::config::DecodeConfig;
use crate::error::{FormatError, FormatResult};

pub use body::{
    FileDataStoreObjectReference, GlobalIdTableEntry, GlobalIdTableEntry2, GlobalIdTableEntry3,
    HashedChunkDescriptor2, ListReference, ObjectDeclaration2, ObjectDeclarationFileData3,
    ObjectDeclarationWithRefCount, ObjectInfoDependencyOverrides, ObjectRevisionWithRefCount,
    ObjectSpaceManifestRoot, RefFormat, RevisionManifestListStart, RevisionManifestStart,
    RevisionRoleDeclaration, RootObjectId, RootObjectReference,
};

// ---------------------------------------------------------------------------
// FileNodeId
// ---------------------------------------------------------------------------

/// The 10-bit kind of a file node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileNodeId(pub u16);

impl FileNodeId {
    pub const FILLER: Self = Self(0x000);
    pub const OBJECT_SPACE_MANIFEST_ROOT: Self = Self(0x004);
    pub const OBJECT_SPACE_MANIFEST_LIST_REFERENCE: Self = Self(0x008);
    pub const OBJECT_SPACE_MANIFEST_LIST_START: Self = Self(0x00C);
    pub const REVISION_MANIFEST_LIST_REFERENCE: Self = Self(0x010);
    pub const REVISION_MANIFEST_LIST_START: Self = Self(0x014);
    pub const REVISION_MANIFEST_START4: Self = Self(0x01B);
    pub const REVISION_MANIFEST_END: Self = Self(0x01C);
    pub const REVISION_MANIFEST_START6: Self = Self(0x01E);
    pub const REVISION_MANIFEST_START7: Self = Self(0x01F);
    pub const GLOBAL_ID_TABLE_START: Self = Self(0x021);
    pub const GLOBAL_ID_TABLE_START2: Self = Self(0x022);
    pub const GLOBAL_ID_TABLE_ENTRY: Self = Self(0x024);
    pub const GLOBAL_ID_TABLE_ENTRY2: Self = Self(0x025);
    pub const GLOBAL_ID_TABLE_ENTRY3: Self = Self(0x026);
    pub const GLOBAL_ID_TABLE_END: Self = Self(0x028);
    pub const OBJECT_DECLARATION_WITH_REF_COUNT: Self = Self(0x02D);
    pub const OBJECT_DECLARATION_WITH_REF_COUNT2: Self = Self(0x02E);
    pub const OBJECT_REVISION_WITH_REF_COUNT: Self = Self(0x041);
    pub const OBJECT_REVISION_WITH_REF_COUNT2: Self = Self(0x042);
    pub const ROOT_OBJECT_REFERENCE2: Self = Self(0x059);
    pub const ROOT_OBJECT_REFERENCE3: Self = Self(0x05A);
    pub const REVISION_ROLE_DECLARATION: Self = Self(0x05C);
    pub const REVISION_ROLE_AND_CONTEXT_DECLARATION: Self = Self(0x05D);
    pub const OBJECT_DECLARATION_FILE_DATA3_REF_COUNT: Self = Self(0x072);
    pub const OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT: Self = Self(0x073);
    pub const OBJECT_DATA_ENCRYPTION_KEY_V2: Self = Self(0x07C);
    pub const OBJECT_INFO_DEPENDENCY_OVERRIDES: Self = Self(0x084);
    pub const DATA_SIGNATURE_GROUP_DEFINITION: Self = Self(0x08C);
    pub const FILE_DATA_STORE_LIST_REFERENCE: Self = Self(0x090);
    pub const FILE_DATA_STORE_OBJECT_REFERENCE: Self = Self(0x094);
    pub const OBJECT_DECLARATION2_REF_COUNT: Self = Self(0x0A4);
    pub const OBJECT_DECLARATION2_LARGE_REF_COUNT: Self = Self(0x0A5);
    pub const OBJECT_GROUP_LIST_REFERENCE: Self = Self(0x0B0);
    pub const OBJECT_GROUP_START: Self = Self(0x0B4);
    pub const OBJECT_GROUP_END: Self = Self(0x0B8);
    pub const HASHED_CHUNK_DESCRIPTOR2: Self = Self(0x0C2);
    pub const READ_ONLY_OBJECT_DECLARATION2_REF_COUNT: Self = Self(0x0C4);
    pub const READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT: Self = Self(0x0C5);
    pub const CHUNK_TERMINATOR: Self = Self(0x0FF);

    /// Name of a recognized kind, or `None` for an id this decoder does not
    /// understand.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::FILLER => "Filler",
            Self::OBJECT_SPACE_MANIFEST_ROOT => "ObjectSpaceManifestRoot",
            Self::OBJECT_SPACE_MANIFEST_LIST_REFERENCE => "ObjectSpaceManifestListReference",
            Self::OBJECT_SPACE_MANIFEST_LIST_START => "ObjectSpaceManifestListStart",
            Self::REVISION_MANIFEST_LIST_REFERENCE => "RevisionManifestListReference",
            Self::REVISION_MANIFEST_LIST_START => "RevisionManifestListStart",
            Self::REVISION_MANIFEST_START4 => "RevisionManifestStart4",
            Self::REVISION_MANIFEST_END => "RevisionManifestEnd",
            Self::REVISION_MANIFEST_START6 => "RevisionManifestStart6",
            Self::REVISION_MANIFEST_START7 => "RevisionManifestStart7",
            Self::GLOBAL_ID_TABLE_START => "GlobalIdTableStart",
            Self::GLOBAL_ID_TABLE_START2 => "GlobalIdTableStart2",
            Self::GLOBAL_ID_TABLE_ENTRY => "GlobalIdTableEntry",
            Self::GLOBAL_ID_TABLE_ENTRY2 => "GlobalIdTableEntry2",
            Self::GLOBAL_ID_TABLE_ENTRY3 => "GlobalIdTableEntry3",
            Self::GLOBAL_ID_TABLE_END => "GlobalIdTableEnd",
            Self::OBJECT_DECLARATION_WITH_REF_COUNT => "ObjectDeclarationWithRefCount",
            Self::OBJECT_DECLARATION_WITH_REF_COUNT2 => "ObjectDeclarationWithRefCount2",
            Self::OBJECT_REVISION_WITH_REF_COUNT => "ObjectRevisionWithRefCount",
            Self::OBJECT_REVISION_WITH_REF_COUNT2 => "ObjectRevisionWithRefCount2",
            Self::ROOT_OBJECT_REFERENCE2 => "RootObjectReference2",
            Self::ROOT_OBJECT_REFERENCE3 => "RootObjectReference3",
            Self::REVISION_ROLE_DECLARATION => "RevisionRoleDeclaration",
            Self::REVISION_ROLE_AND_CONTEXT_DECLARATION => "RevisionRoleAndContextDeclaration",
            Self::OBJECT_DECLARATION_FILE_DATA3_REF_COUNT => "ObjectDeclarationFileData3RefCount",
            Self::OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT => {
                "ObjectDeclarationFileData3LargeRefCount"
            }
            Self::OBJECT_DATA_ENCRYPTION_KEY_V2 => "ObjectDataEncryptionKeyV2",
            Self::OBJECT_INFO_DEPENDENCY_OVERRIDES => "ObjectInfoDependencyOverrides",
            Self::DATA_SIGNATURE_GROUP_DEFINITION => "DataSignatureGroupDefinition",
            Self::FILE_DATA_STORE_LIST_REFERENCE => "FileDataStoreListReference",
            Self::FILE_DATA_STORE_OBJECT_REFERENCE => "FileDataStoreObjectReference",
            Self::OBJECT_DECLARATION2_REF_COUNT => "ObjectDeclaration2RefCount",
            Self::OBJECT_DECLARATION2_LARGE_REF_COUNT => "ObjectDeclaration2LargeRefCount",
            Self::OBJECT_GROUP_LIST_REFERENCE => "ObjectGroupListReference",
            Self::OBJECT_GROUP_START => "ObjectGroupStart",
            Self::OBJECT_GROUP_END => "ObjectGroupEnd",
            Self::HASHED_CHUNK_DESCRIPTOR2 => "HashedChunkDescriptor2",
            Self::READ_ONLY_OBJECT_DECLARATION2_REF_COUNT => "ReadOnlyObjectDeclaration2RefCount",
            Self::READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT => {
                "ReadOnlyObjectDeclaration2LargeRefCount"
            }
            Self::CHUNK_TERMINATOR => "ChunkTerminator",
            _ => return None,
        })
    }

    pub fn is_recognized(self) -> bool {
        self.name().is_some()
    }

    /// Base type implied by the kind: 2 for references to another file node
    /// list, 1 for references to data, 0 otherwise.
    pub fn base_type(self) -> u8 {
        match self {
            Self::OBJECT_SPACE_MANIFEST_LIST_REFERENCE
            | Self::REVISION_MANIFEST_LIST_REFERENCE
            | Self::FILE_DATA_STORE_LIST_REFERENCE
            | Self::OBJECT_GROUP_LIST_REFERENCE => 2,
            Self::OBJECT_DECLARATION_WITH_REF_COUNT
            | Self::OBJECT_DECLARATION_WITH_REF_COUNT2
            | Self::OBJECT_REVISION_WITH_REF_COUNT
            | Self::OBJECT_REVISION_WITH_REF_COUNT2
            | Self::OBJECT_DATA_ENCRYPTION_KEY_V2
            | Self::OBJECT_INFO_DEPENDENCY_OVERRIDES
            | Self::FILE_DATA_STORE_OBJECT_REFERENCE
            | Self::OBJECT_DECLARATION2_REF_COUNT
            | Self::OBJECT_DECLARATION2_LARGE_REF_COUNT
            | Self::HASHED_CHUNK_DESCRIPTOR2
            | Self::READ_ONLY_OBJECT_DECLARATION2_REF_COUNT
            | Self::READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT => 1,
            _ => 0,
        }
    }
}

impl fmt::Debug for FileNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({:#05x})", self.0),
            None => write!(f, "FileNodeId({:#05x})", self.0),
        }
    }
}

impl fmt::Display for FileNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{:#05x}", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// FileNodeHeader
// ---------------------------------------------------------------------------

/// Packed node header: id (10 bits), size (13), stpFormat (2), cbFormat (2),
/// baseType (4), reserved (1), least significant bit first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNodeHeader {
    pub id: FileNodeId,
    pub size: u16,
    pub stp_format: StpFormat,
    pub cb_format: CbFormat,
    pub base_type: u8,
    pub reserved: bool,
}

impl FileNodeHeader {
    pub const SIZE: usize = 4;
    pub const MAX_NODE_SIZE: u16 = (1 << 13) - 1;

    pub fn read(cursor: &mut ByteCursor<'_>) -> FormatResult<Self> {
        let base = cursor.offset();
        let mut bits = BitReader::with_base(cursor.read_bytes(Self::SIZE)?, base);
        Ok(Self {
            id: FileNodeId(bits.read_uint(10)? as u16),
            size: bits.read_uint(13)? as u16,
            stp_format: StpFormat::from_bits(bits.read_uint(2)? as u8),
            cb_format: CbFormat::from_bits(bits.read_uint(2)? as u8),
            base_type: bits.read_uint(4)? as u8,
            reserved: bits.read_bool()?,
        })
    }

    pub fn write(&self, writer: &mut ByteWriter) -> FormatResult<()> {
        let mut bits = BitWriter::new();
        bits.append_uint(self.id.0 as u64, 10)?;
        bits.append_uint(self.size as u64, 13)?;
        bits.append_uint(self.stp_format.bits() as u64, 2)?;
        bits.append_uint(self.cb_format.bits() as u64, 2)?;
        bits.append_uint(self.base_type as u64, 4)?;
        bits.append_bool(self.reserved)?;
        writer.put_bytes(&bits.finish());
        Ok(())
    }

    fn ref_format(&self) -> RefFormat {
        (self.stp_format, self.cb_format)
    }
}

// ---------------------------------------------------------------------------
// FileNodeBody
// ---------------------------------------------------------------------------

/// Decoded body of a file node.
///
/// Kinds that share a layout share a body struct; the variant decides the
/// width of variable fields such as reference counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileNodeBody {
    /// Header-only kinds: end markers, the chunk terminator and filler.
    Empty,
    ObjectSpaceManifestRoot(ObjectSpaceManifestRoot),
    ObjectSpaceManifestListReference(ListReference),
    ObjectSpaceManifestListStart(ExtendedGuid),
    RevisionManifestListReference(ListReference),
    RevisionManifestListStart(RevisionManifestListStart),
    RevisionManifestStart4(RevisionManifestStart),
    RevisionManifestStart6(RevisionManifestStart),
    RevisionManifestStart7(RevisionManifestStart),
    GlobalIdTableStart(u8),
    GlobalIdTableEntry(GlobalIdTableEntry),
    GlobalIdTableEntry2(GlobalIdTableEntry2),
    GlobalIdTableEntry3(GlobalIdTableEntry3),
    ObjectDeclarationWithRefCount(ObjectDeclarationWithRefCount),
    ObjectDeclarationWithRefCount2(ObjectDeclarationWithRefCount),
    ObjectRevisionWithRefCount(ObjectRevisionWithRefCount),
    ObjectRevisionWithRefCount2(ObjectRevisionWithRefCount),
    RootObjectReference2(RootObjectReference),
    RootObjectReference3(RootObjectReference),
    RevisionRoleDeclaration(RevisionRoleDeclaration),
    RevisionRoleAndContextDeclaration(RevisionRoleDeclaration),
    ObjectDeclarationFileData3RefCount(ObjectDeclarationFileData3),
    ObjectDeclarationFileData3LargeRefCount(ObjectDeclarationFileData3),
    ObjectDataEncryptionKeyV2(ChunkReference),
    ObjectInfoDependencyOverrides(ObjectInfoDependencyOverrides),
    DataSignatureGroupDefinition(ExtendedGuid),
    FileDataStoreListReference(ListReference),
    FileDataStoreObjectReference(FileDataStoreObjectReference),
    ObjectDeclaration2RefCount(ObjectDeclaration2),
    ObjectDeclaration2LargeRefCount(ObjectDeclaration2),
    ObjectGroupListReference(ListReference),
    ObjectGroupStart(ExtendedGuid),
    HashedChunkDescriptor2(HashedChunkDescriptor2),
    ReadOnlyObjectDeclaration2RefCount(ObjectDeclaration2),
    ReadOnlyObjectDeclaration2LargeRefCount(ObjectDeclaration2),
    /// Body of an unrecognized kind, kept verbatim.
    Unknown(Vec<u8>),
}

impl FileNodeBody {
    /// The node kind this body belongs to. `Empty` and `Unknown` bodies are
    /// shared by several kinds and return `None`.
    pub fn kind(&self) -> Option<FileNodeId> {
        use FileNodeBody as B;
        Some(match self {
            B::Empty | B::Unknown(_) => return None,
            B::ObjectSpaceManifestRoot(_) => FileNodeId::OBJECT_SPACE_MANIFEST_ROOT,
            B::ObjectSpaceManifestListReference(_) => {
                FileNodeId::OBJECT_SPACE_MANIFEST_LIST_REFERENCE
            }
            B::ObjectSpaceManifestListStart(_) => FileNodeId::OBJECT_SPACE_MANIFEST_LIST_START,
            B::RevisionManifestListReference(_) => FileNodeId::REVISION_MANIFEST_LIST_REFERENCE,
            B::RevisionManifestListStart(_) => FileNodeId::REVISION_MANIFEST_LIST_START,
            B::RevisionManifestStart4(_) => FileNodeId::REVISION_MANIFEST_START4,
            B::RevisionManifestStart6(_) => FileNodeId::REVISION_MANIFEST_START6,
            B::RevisionManifestStart7(_) => FileNodeId::REVISION_MANIFEST_START7,
            B::GlobalIdTableStart(_) => FileNodeId::GLOBAL_ID_TABLE_START,
            B::GlobalIdTableEntry(_) => FileNodeId::GLOBAL_ID_TABLE_ENTRY,
            B::GlobalIdTableEntry2(_) => FileNodeId::GLOBAL_ID_TABLE_ENTRY2,
            B::GlobalIdTableEntry3(_) => FileNodeId::GLOBAL_ID_TABLE_ENTRY3,
            B::ObjectDeclarationWithRefCount(_) => FileNodeId::OBJECT_DECLARATION_WITH_REF_COUNT,
            B::ObjectDeclarationWithRefCount2(_) => FileNodeId::OBJECT_DECLARATION_WITH_REF_COUNT2,
            B::ObjectRevisionWithRefCount(_) => FileNodeId::OBJECT_REVISION_WITH_REF_COUNT,
            B::ObjectRevisionWithRefCount2(_) => FileNodeId::OBJECT_REVISION_WITH_REF_COUNT2,
            B::RootObjectReference2(_) => FileNodeId::ROOT_OBJECT_REFERENCE2,
            B::RootObjectReference3(_) => FileNodeId::ROOT_OBJECT_REFERENCE3,
            B::RevisionRoleDeclaration(_) => FileNodeId::REVISION_ROLE_DECLARATION,
            B::RevisionRoleAndContextDeclaration(_) => {
                FileNodeId::REVISION_ROLE_AND_CONTEXT_DECLARATION
            }
            B::ObjectDeclarationFileData3RefCount(_) => {
                FileNodeId::OBJECT_DECLARATION_FILE_DATA3_REF_COUNT
            }
            B::ObjectDeclarationFileData3LargeRefCount(_) => {
                FileNodeId::OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT
            }
            B::ObjectDataEncryptionKeyV2(_) => FileNodeId::OBJECT_DATA_ENCRYPTION_KEY_V2,
            B::ObjectInfoDependencyOverrides(_) => FileNodeId::OBJECT_INFO_DEPENDENCY_OVERRIDES,
            B::DataSignatureGroupDefinition(_) => FileNodeId::DATA_SIGNATURE_GROUP_DEFINITION,
            B::FileDataStoreListReference(_) => FileNodeId::FILE_DATA_STORE_LIST_REFERENCE,
            B::FileDataStoreObjectReference(_) => FileNodeId::FILE_DATA_STORE_OBJECT_REFERENCE,
            B::ObjectDeclaration2RefCount(_) => FileNodeId::OBJECT_DECLARATION2_REF_COUNT,
            B::ObjectDeclaration2LargeRefCount(_) => {
                FileNodeId::OBJECT_DECLARATION2_LARGE_REF_COUNT
            }
            B::ObjectGroupListReference(_) => FileNodeId::OBJECT_GROUP_LIST_REFERENCE,
            B::ObjectGroupStart(_) => FileNodeId::OBJECT_GROUP_START,
            B::HashedChunkDescriptor2(_) => FileNodeId::HASHED_CHUNK_DESCRIPTOR2,
            B::ReadOnlyObjectDeclaration2RefCount(_) => {
                FileNodeId::READ_ONLY_OBJECT_DECLARATION2_REF_COUNT
            }
            B::ReadOnlyObjectDeclaration2LargeRefCount(_) => {
                FileNodeId::READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT
            }
        })
    }

    /// The chunk reference held by the body, if any.
    pub fn chunk_reference(&self) -> Option<&ChunkReference> {
        use FileNodeBody as B;
        match self {
            B::ObjectSpaceManifestListReference(r)
            | B::RevisionManifestListReference(r)
            | B::FileDataStoreListReference(r)
            | B::ObjectGroupListReference(r) => Some(&r.list_ref),
            B::ObjectDeclarationWithRefCount(d) | B::ObjectDeclarationWithRefCount2(d) => {
                Some(&d.object_ref)
            }
            B::ObjectRevisionWithRefCount(r) | B::ObjectRevisionWithRefCount2(r) => {
                Some(&r.object_ref)
            }
            B::ObjectDataEncryptionKeyV2(r) => Some(r),
            B::ObjectInfoDependencyOverrides(o) => Some(&o.data_ref),
            B::FileDataStoreObjectReference(f) => Some(&f.blob_ref),
            B::ObjectDeclaration2RefCount(d)
            | B::ObjectDeclaration2LargeRefCount(d)
            | B::ReadOnlyObjectDeclaration2RefCount(d)
            | B::ReadOnlyObjectDeclaration2LargeRefCount(d) => Some(&d.object_ref),
            B::HashedChunkDescriptor2(h) => Some(&h.blob_ref),
            _ => None,
        }
    }

    fn read(
        header: &FileNodeHeader,
        cursor: &mut ByteCursor<'_>,
        body_len: usize,
    ) -> FormatResult<Self> {
        use FileNodeBody as B;
        use FileNodeId as K;
        let fmt = header.ref_format();
        Ok(match header.id {
            K::FILLER
            | K::REVISION_MANIFEST_END
            | K::GLOBAL_ID_TABLE_START2
            | K::GLOBAL_ID_TABLE_END
            | K::OBJECT_GROUP_END
            | K::CHUNK_TERMINATOR => B::Empty,
            K::OBJECT_SPACE_MANIFEST_ROOT => B::ObjectSpaceManifestRoot(ObjectSpaceManifestRoot {
                gosid_root: ExtendedGuid::read(cursor)?,
            }),
            K::OBJECT_SPACE_MANIFEST_LIST_REFERENCE => {
                B::ObjectSpaceManifestListReference(ListReference::read(cursor, fmt, true)?)
            }
            K::OBJECT_SPACE_MANIFEST_LIST_START => {
                B::ObjectSpaceManifestListStart(ExtendedGuid::read(cursor)?)
            }
            K::REVISION_MANIFEST_LIST_REFERENCE => {
                B::RevisionManifestListReference(ListReference::read(cursor, fmt, false)?)
            }
            K::REVISION_MANIFEST_LIST_START => {
                B::RevisionManifestListStart(RevisionManifestListStart {
                    gosid: ExtendedGuid::read(cursor)?,
                    n_instance: cursor.read_u32()?,
                })
            }
            K::REVISION_MANIFEST_START4 => {
                B::RevisionManifestStart4(RevisionManifestStart::read4(cursor)?)
            }
            K::REVISION_MANIFEST_START6 => {
                B::RevisionManifestStart6(RevisionManifestStart::read6(cursor, false)?)
            }
            K::REVISION_MANIFEST_START7 => {
                B::RevisionManifestStart7(RevisionManifestStart::read6(cursor, true)?)
            }
            K::GLOBAL_ID_TABLE_START => B::GlobalIdTableStart(cursor.read_u8()?),
            K::GLOBAL_ID_TABLE_ENTRY => B::GlobalIdTableEntry(GlobalIdTableEntry {
                index: cursor.read_u32()?,
                guid: cursor.read_guid()?,
            }),
            K::GLOBAL_ID_TABLE_ENTRY2 => B::GlobalIdTableEntry2(GlobalIdTableEntry2 {
                index_map_from: cursor.read_u32()?,
                index_map_to: cursor.read_u32()?,
            }),
            K::GLOBAL_ID_TABLE_ENTRY3 => B::GlobalIdTableEntry3(GlobalIdTableEntry3 {
                index_copy_from_start: cursor.read_u32()?,
                entries_to_copy: cursor.read_u32()?,
                index_copy_to_start: cursor.read_u32()?,
            }),
            K::OBJECT_DECLARATION_WITH_REF_COUNT => B::ObjectDeclarationWithRefCount(
                ObjectDeclarationWithRefCount::read(cursor, fmt, false)?,
            ),
            K::OBJECT_DECLARATION_WITH_REF_COUNT2 => B::ObjectDeclarationWithRefCount2(
                ObjectDeclarationWithRefCount::read(cursor, fmt, true)?,
            ),
            K::OBJECT_REVISION_WITH_REF_COUNT => {
                B::ObjectRevisionWithRefCount(ObjectRevisionWithRefCount::read(cursor, fmt)?)
            }
            K::OBJECT_REVISION_WITH_REF_COUNT2 => {
                B::ObjectRevisionWithRefCount2(ObjectRevisionWithRefCount::read2(cursor, fmt)?)
            }
            K::ROOT_OBJECT_REFERENCE2 => B::RootObjectReference2(RootObjectReference {
                oid_root: RootObjectId::Compact(CompactId::read(cursor)?),
                root_role: cursor.read_u32()?,
            }),
            K::ROOT_OBJECT_REFERENCE3 => B::RootObjectReference3(RootObjectReference {
                oid_root: RootObjectId::Extended(ExtendedGuid::read(cursor)?),
                root_role: cursor.read_u32()?,
            }),
            K::REVISION_ROLE_DECLARATION => B::RevisionRoleDeclaration(RevisionRoleDeclaration {
                rid: ExtendedGuid::read(cursor)?,
                revision_role: cursor.read_u32()?,
                gctxid: None,
            }),
            K::REVISION_ROLE_AND_CONTEXT_DECLARATION => {
                B::RevisionRoleAndContextDeclaration(RevisionRoleDeclaration {
                    rid: ExtendedGuid::read(cursor)?,
                    revision_role: cursor.read_u32()?,
                    gctxid: Some(ExtendedGuid::read(cursor)?),
                })
            }
            K::OBJECT_DECLARATION_FILE_DATA3_REF_COUNT => B::ObjectDeclarationFileData3RefCount(
                ObjectDeclarationFileData3::read(cursor, false)?,
            ),
            K::OBJECT_DECLARATION_FILE_DATA3_LARGE_REF_COUNT => {
                let declaration = ObjectDeclarationFileData3::read(cursor, true)?;
                B::ObjectDeclarationFileData3LargeRefCount(declaration)
            }
            K::OBJECT_DATA_ENCRYPTION_KEY_V2 => {
                B::ObjectDataEncryptionKeyV2(ChunkReference::read_packed(cursor, fmt.0, fmt.1)?)
            }
            K::OBJECT_INFO_DEPENDENCY_OVERRIDES => {
                let data_ref = ChunkReference::read_packed(cursor, fmt.0, fmt.1)?;
                let inline_len = body_len.saturating_sub(data_ref.encoded_len());
                B::ObjectInfoDependencyOverrides(ObjectInfoDependencyOverrides {
                    data_ref,
                    inline_data: cursor.read_bytes(inline_len)?.to_vec(),
                })
            }
            K::DATA_SIGNATURE_GROUP_DEFINITION => {
                B::DataSignatureGroupDefinition(ExtendedGuid::read(cursor)?)
            }
            K::FILE_DATA_STORE_LIST_REFERENCE => {
                B::FileDataStoreListReference(ListReference::read(cursor, fmt, false)?)
            }
            K::FILE_DATA_STORE_OBJECT_REFERENCE => {
                B::FileDataStoreObjectReference(FileDataStoreObjectReference {
                    blob_ref: ChunkReference::read_packed(cursor, fmt.0, fmt.1)?,
                    guid_reference: cursor.read_guid()?,
                })
            }
            K::OBJECT_DECLARATION2_REF_COUNT => {
                B::ObjectDeclaration2RefCount(ObjectDeclaration2::read(cursor, fmt, false, false)?)
            }
            K::OBJECT_DECLARATION2_LARGE_REF_COUNT => {
                let declaration = ObjectDeclaration2::read(cursor, fmt, true, false)?;
                B::ObjectDeclaration2LargeRefCount(declaration)
            }
            K::OBJECT_GROUP_LIST_REFERENCE => {
                B::ObjectGroupListReference(ListReference::read(cursor, fmt, true)?)
            }
            K::OBJECT_GROUP_START => B::ObjectGroupStart(ExtendedGuid::read(cursor)?),
            K::HASHED_CHUNK_DESCRIPTOR2 => B::HashedChunkDescriptor2(HashedChunkDescriptor2 {
                blob_ref: ChunkReference::read_packed(cursor, fmt.0, fmt.1)?,
                guid_hash: cursor.read_array::<16>()?,
            }),
            K::READ_ONLY_OBJECT_DECLARATION2_REF_COUNT => B::ReadOnlyObjectDeclaration2RefCount(
                ObjectDeclaration2::read(cursor, fmt, false, true)?,
            ),
            K::READ_ONLY_OBJECT_DECLARATION2_LARGE_REF_COUNT => {
                let declaration = ObjectDeclaration2::read(cursor, fmt, true, true)?;
                B::ReadOnlyObjectDeclaration2LargeRefCount(declaration)
            }
            _ => B::Unknown(cursor.read_bytes(body_len)?.to_vec()),
        })
    }

    fn write(&self, writer: &mut ByteWriter) -> FormatResult<()> {
        use FileNodeBody as B;
        match self {
            B::Empty => {}
            B::ObjectSpaceManifestRoot(r) => r.gosid_root.write(writer),
            B::ObjectSpaceManifestListReference(r)
            | B::RevisionManifestListReference(r)
            | B::FileDataStoreListReference(r)
            | B::ObjectGroupListReference(r) => r.write(writer)?,
            B::ObjectSpaceManifestListStart(id)
            | B::DataSignatureGroupDefinition(id)
            | B::ObjectGroupStart(id) => id.write(writer),
            B::RevisionManifestListStart(s) => {
                s.gosid.write(writer);
                writer.put_u32(s.n_instance);
            }
            B::RevisionManifestStart4(s)
            | B::RevisionManifestStart6(s)
            | B::RevisionManifestStart7(s) => s.write(writer),
            B::GlobalIdTableStart(reserved) => writer.put_u8(*reserved),
            B::GlobalIdTableEntry(e) => {
                writer.put_u32(e.index);
                writer.put_guid(&e.guid);
            }
            B::GlobalIdTableEntry2(e) => {
                writer.put_u32(e.index_map_from);
                writer.put_u32(e.index_map_to);
            }
            B::GlobalIdTableEntry3(e) => {
                writer.put_u32(e.index_copy_from_start);
                writer.put_u32(e.entries_to_copy);
                writer.put_u32(e.index_copy_to_start);
            }
            B::ObjectDeclarationWithRefCount(d) => d.write(writer, false)?,
            B::ObjectDeclarationWithRefCount2(d) => d.write(writer, true)?,
            B::ObjectRevisionWithRefCount(r) => r.write(writer, false)?,
            B::ObjectRevisionWithRefCount2(r) => r.write(writer, true)?,
            B::RootObjectReference2(r) | B::RootObjectReference3(r) => {
                match &r.oid_root {
                    RootObjectId::Compact(id) => id.write(writer),
                    RootObjectId::Extended(id) => id.write(writer),
                }
                writer.put_u32(r.root_role);
            }
            B::RevisionRoleDeclaration(d) | B::RevisionRoleAndContextDeclaration(d) => {
                d.rid.write(writer);
                writer.put_u32(d.revision_role);
                if let Some(ctx) = &d.gctxid {
                    ctx.write(writer);
                }
            }
            B::ObjectDeclarationFileData3RefCount(d) => d.write(writer, false)?,
            B::ObjectDeclarationFileData3LargeRefCount(d) => d.write(writer, true)?,
            B::ObjectDataEncryptionKeyV2(r) => r.write(writer)?,
            B::ObjectInfoDependencyOverrides(o) => {
                o.data_ref.write(writer)?;
                writer.put_bytes(&o.inline_data);
            }
            B::FileDataStoreObjectReference(f) => {
                f.blob_ref.write(writer)?;
                writer.put_guid(&f.guid_reference);
            }
            B::ObjectDeclaration2RefCount(d) | B::ReadOnlyObjectDeclaration2RefCount(d) => {
                d.write(writer, false)?
            }
            B::ObjectDeclaration2LargeRefCount(d)
            | B::ReadOnlyObjectDeclaration2LargeRefCount(d) => d.write(writer, true)?,
            B::HashedChunkDescriptor2(h) => {
                h.blob_ref.write(writer)?;
                writer.put_bytes(&h.guid_hash);
            }
            B::Unknown(raw) => writer.put_bytes(raw),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileNode
// ---------------------------------------------------------------------------

/// A decoded file node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub header: FileNodeHeader,
    pub body: FileNodeBody,
}

impl FileNode {
    /// Build a node of kind `id`, computing the header from the body.
    pub fn new(id: FileNodeId, body: FileNodeBody) -> FormatResult<Self> {
        if let Some(kind) = body.kind() {
            if kind != id {
                return Err(FormatError::framing(
                    0,
                    format!("body of kind {kind} cannot be stored in a {id} node"),
                ));
            }
        }
        let mut writer = ByteWriter::new();
        body.write(&mut writer)?;
        let size = FileNodeHeader::SIZE + writer.len();
        if size > FileNodeHeader::MAX_NODE_SIZE as usize {
            return Err(TypeError::ValueOutOfRange {
                value: size as u64,
                width: 13,
            }
            .into());
        }
        let (stp_format, cb_format) = body
            .chunk_reference()
            .and_then(ChunkReference::formats)
            .unwrap_or((StpFormat::U64, CbFormat::U32));
        let header = FileNodeHeader {
            id,
            size: if id == FileNodeId::FILLER { 0 } else { size as u16 },
            stp_format,
            cb_format,
            base_type: id.base_type(),
            reserved: true,
        };
        Ok(Self { header, body })
    }

    /// The chunk terminator node.
    pub fn terminator() -> Self {
        Self {
            header: FileNodeHeader {
                id: FileNodeId::CHUNK_TERMINATOR,
                size: FileNodeHeader::SIZE as u16,
                stp_format: StpFormat::U64,
                cb_format: CbFormat::U32,
                base_type: 0,
                reserved: true,
            },
            body: FileNodeBody::Empty,
        }
    }

    pub fn id(&self) -> FileNodeId {
        self.header.id
    }

    /// Bytes the node occupies in its fragment.
    pub fn size(&self) -> usize {
        if self.is_filler() {
            FileNodeHeader::SIZE
        } else {
            self.header.size as usize
        }
    }

    pub fn is_filler(&self) -> bool {
        self.header.id == FileNodeId::FILLER
    }

    pub fn is_terminator(&self) -> bool {
        self.header.id == FileNodeId::CHUNK_TERMINATOR
    }

    /// Returns `false` for nodes kept as raw bytes.
    pub fn is_recognized(&self) -> bool {
        !matches!(self.body, FileNodeBody::Unknown(_))
    }

    pub fn chunk_reference(&self) -> Option<&ChunkReference> {
        self.body.chunk_reference()
    }

    /// Decode one node from the cursor.
    ///
    /// An id-0 node is filler and consumes its 4 header bytes. Any other
    /// node consumes exactly `size` bytes or fails.
    pub fn read(cursor: &mut ByteCursor<'_>, config: &DecodeConfig) -> FormatResult<Self> {
        let start = cursor.offset();
        let header = FileNodeHeader::read(cursor)?;
        if header.id == FileNodeId::FILLER {
            return Ok(Self {
                header,
                body: FileNodeBody::Empty,
            });
        }
        if (header.size as usize) < FileNodeHeader::SIZE {
            return Err(FormatError::framing(
                start,
                format!("{} node declares size {} below the header size", header.id, header.size),
            ));
        }
        let body_len = header.size as usize - FileNodeHeader::SIZE;
        // The declared node must fit in the buffer before any body is parsed.
        cursor.clone().read_bytes(body_len)?;

        if !header.id.is_recognized() {
            if config.strict_node_kinds {
                return Err(FormatError::UnrecognizedFileNodeKind {
                    offset: start,
                    id: header.id.0,
                });
            }
            warn!(
                offset = start,
                id = header.id.0,
                size = header.size,
                "unrecognized file node kind kept as raw bytes"
            );
        }

        let mut body_cursor = cursor.clone();
        let body = FileNodeBody::read(&header, &mut body_cursor, body_len)?;
        let used = body_cursor.position() - cursor.position();
        if used != body_len {
            return Err(FormatError::framing(
                start,
                format!("{} body is {used} bytes but the header declares {body_len}", header.id),
            ));
        }
        cursor.read_bytes(body_len)?;
        trace!(offset = start, kind = %header.id, size = header.size, "decoded file node");
        Ok(Self { header, body })
    }

    /// Encode header and body.
    pub fn write(&self, writer: &mut ByteWriter) -> FormatResult<()> {
        let mut body = ByteWriter::new();
        self.body.write(&mut body)?;
        if !self.is_filler() && FileNodeHeader::SIZE + body.len() != self.header.size as usize {
            return Err(FormatError::framing(
                0,
                format!(
                    "{} body encodes to {} bytes but the header declares size {}",
                    self.header.id,
                    body.len(),
                    self.header.size
                ),
            ));
        }
        self.header.write(writer)?;
        writer.put_bytes(&body.into_inner());
        Ok(())
    }

    /// Resolve the extended id behind a compact id using a lookup function,
    /// typically backed by a global id table.
    pub fn resolve_compact_id(
        id: CompactId,
        lookup: impl Fn(u32) -> Option<Uuid>,
    ) -> FormatResult<ExtendedGuid> {
        lookup(id.guid_index)
            .map(|guid| id.resolve_with(guid))
            .ok_or(FormatError::UnresolvedCompactId { id })
    }
}

/// Decode the node starting at `offset` in `bytes`.
///
/// Returns the node and the number of bytes it occupies.
pub fn decode_file_node(
    bytes: &[u8],
    offset: usize,
    config: &DecodeConfig,
) -> FormatResult<(FileNode, usize)> {
    let tail = bytes.get(offset..).ok_or(FormatError::TruncatedInput {
        offset: offset as u64,
        needed: FileNodeHeader::SIZE as u64,
        available: 0,
        list_id: None,
    })?;
    let mut cursor = ByteCursor::with_base(tail, offset as u64);
    let node = FileNode::read(&mut cursor, config)?;
    Ok((node, cursor.position()))
}

/// Encode a node to a fresh buffer.
pub fn encode_file_node(node: &FileNode) -> FormatResult<Vec<u8>> {
    let mut writer = ByteWriter::new();
    node.write(&mut writer)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guid(n: u32) -> ExtendedGuid {
        ExtendedGuid::new(Uuid::from_u128(0x1111_2222_3333_4444_5555_6666_7777_8888), n)
    }

    fn strict() -> DecodeConfig {
        DecodeConfig {
            strict_node_kinds: true,
            ..DecodeConfig::default()
        }
    }

    #[test]
    fn header_bit_packing() {
        let header = FileNodeHeader {
            id: FileNodeId::OBJECT_GROUP_LIST_REFERENCE,
            size: 0x20,
            stp_format: StpFormat::CompressedU32,
            cb_format: CbFormat::CompressedU8,
            base_type: 2,
            reserved: true,
        };
        let mut w = ByteWriter::new();
        header.write(&mut w).unwrap();
        let bytes = w.into_inner();
        let raw = u32::from_le_bytes(bytes[..4].try_into().unwrap());
        assert_eq!(raw & 0x3FF, 0x0B0);
        assert_eq!((raw >> 10) & 0x1FFF, 0x20);
        assert_eq!((raw >> 23) & 0x3, 3);
        assert_eq!((raw >> 25) & 0x3, 2);
        assert_eq!((raw >> 27) & 0xF, 2);
        assert_eq!(raw >> 31, 1);
        let back = FileNodeHeader::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(back, header);
    }

    proptest! {
        #[test]
        fn header_roundtrip(raw in any::<u32>()) {
            let bytes = raw.to_le_bytes();
            let header = FileNodeHeader::read(&mut ByteCursor::new(&bytes)).unwrap();
            let mut w = ByteWriter::new();
            header.write(&mut w).unwrap();
            prop_assert_eq!(w.into_inner(), bytes.to_vec());
        }
    }

    #[test]
    fn new_computes_header() {
        let list_ref =
            ChunkReference::packed(0x1000, 0x80, StpFormat::U32, CbFormat::CompressedU8).unwrap();
        let node = FileNode::new(
            FileNodeId::OBJECT_GROUP_LIST_REFERENCE,
            FileNodeBody::ObjectGroupListReference(ListReference {
                list_ref,
                id: Some(guid(7)),
            }),
        )
        .unwrap();
        assert_eq!(node.header.size, 4 + 4 + 1 + 20);
        assert_eq!(node.header.base_type, 2);
        assert_eq!(node.header.stp_format, StpFormat::U32);
        assert_eq!(node.header.cb_format, CbFormat::CompressedU8);

        let bytes = encode_file_node(&node).unwrap();
        let (back, consumed) = decode_file_node(&bytes, 0, &DecodeConfig::default()).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(back, node);
        assert_eq!(encode_file_node(&back).unwrap(), bytes);
    }

    #[test]
    fn mismatched_body_kind_is_rejected() {
        let err = FileNode::new(FileNodeId::OBJECT_GROUP_START, FileNodeBody::GlobalIdTableStart(0))
            .unwrap_err();
        assert!(matches!(err, FormatError::MalformedFraming { .. }));
    }

    #[test]
    fn filler_consumes_four_bytes() {
        let bytes = [0u8; 12];
        let (node, consumed) = decode_file_node(&bytes, 4, &strict()).unwrap();
        assert!(node.is_filler());
        assert_eq!(consumed, 4);
        assert_eq!(node.size(), 4);
    }

    #[test]
    fn nonzero_id_with_tiny_size_is_framing_error() {
        let header = FileNodeHeader {
            id: FileNodeId::OBJECT_GROUP_END,
            size: 2,
            stp_format: StpFormat::U64,
            cb_format: CbFormat::U32,
            base_type: 0,
            reserved: true,
        };
        let mut w = ByteWriter::new();
        header.write(&mut w).unwrap();
        let err = decode_file_node(&w.into_inner(), 0, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, FormatError::MalformedFraming { offset: 0, .. }));
    }

    #[test]
    fn body_shorter_than_declared_size_is_framing_error() {
        let mut node =
            FileNode::new(FileNodeId::OBJECT_GROUP_START, FileNodeBody::ObjectGroupStart(guid(1)))
                .unwrap();
        node.header.size += 4;
        let mut w = ByteWriter::new();
        node.header.write(&mut w).unwrap();
        guid(1).write(&mut w);
        w.put_u32(0);
        let err = decode_file_node(&w.into_inner(), 0, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, FormatError::MalformedFraming { .. }));
    }

    #[test]
    fn declared_size_beyond_buffer_is_truncation() {
        let node =
            FileNode::new(FileNodeId::OBJECT_GROUP_START, FileNodeBody::ObjectGroupStart(guid(1)))
                .unwrap();
        let bytes = encode_file_node(&node).unwrap();
        let err =
            decode_file_node(&bytes[..bytes.len() - 3], 0, &DecodeConfig::default()).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn unknown_kind_preserved_or_rejected() {
        let header = FileNodeHeader {
            id: FileNodeId(0x3A1),
            size: 7,
            stp_format: StpFormat::U64,
            cb_format: CbFormat::U32,
            base_type: 0,
            reserved: false,
        };
        let mut w = ByteWriter::new();
        header.write(&mut w).unwrap();
        w.put_bytes(&[1, 2, 3]);
        let bytes = w.into_inner();

        let (node, consumed) = decode_file_node(&bytes, 0, &DecodeConfig::default()).unwrap();
        assert_eq!(consumed, 7);
        assert!(!node.is_recognized());
        assert_eq!(node.body, FileNodeBody::Unknown(vec![1, 2, 3]));
        assert_eq!(encode_file_node(&node).unwrap(), bytes);

        let err = decode_file_node(&bytes, 0, &strict()).unwrap_err();
        assert!(matches!(err, FormatError::UnrecognizedFileNodeKind { offset: 0, id: 0x3A1 }));
    }

    #[test]
    fn dependency_overrides_inline_data() {
        let node = FileNode::new(
            FileNodeId::OBJECT_INFO_DEPENDENCY_OVERRIDES,
            FileNodeBody::ObjectInfoDependencyOverrides(ObjectInfoDependencyOverrides {
                data_ref: ChunkReference::nil_packed(StpFormat::U32, CbFormat::U32),
                inline_data: vec![9; 11],
            }),
        )
        .unwrap();
        let bytes = encode_file_node(&node).unwrap();
        let (back, _) = decode_file_node(&bytes, 0, &DecodeConfig::default()).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn compact_id_resolution() {
        let id = CompactId::new(5, 2).unwrap();
        let table = Uuid::from_u128(42);
        let resolved = FileNode::resolve_compact_id(id, |i| (i == 2).then_some(table)).unwrap();
        assert_eq!(resolved, ExtendedGuid::new(table, 5));
        let err = FileNode::resolve_compact_id(id, |_| None).unwrap_err();
        assert!(matches!(err, FormatError::UnresolvedCompactId { .. }));
    }

    #[test]
    fn kind_names() {
        assert_eq!(FileNodeId::CHUNK_TERMINATOR.name(), Some("ChunkTerminator"));
        assert_eq!(FileNodeId(0x3FF).name(), None);
        assert_eq!(format!("{:?}", FileNodeId(0x0B4)), "ObjectGroupStart(0x0b4)");
    }
}
