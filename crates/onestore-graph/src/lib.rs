//! Cell-storage graph assembly.
//!
//! Decodes a data element package into its typed elements and assembles
//! them into a [`Package`]: storage index lookups, per-cell revision chains,
//! the header cell, and object groups merged into [`RevisionStoreObject`]s
//! with their property sets or file data.
//!
//! # Key Types
//!
//! - [`StreamObjectHeader`] - framing of every cell-storage structure
//! - [`DataElementPackage`] / [`DataElement`] - the decoded element sequence
//! - [`ObjectSpaceObjectPropSet`] - an object's properties and reference streams
//! - [`RevisionStoreObjectGroup`] - one object group after assembly
//! - [`Package`] - the assembled package

pub mod element;
pub mod error;
pub mod group;
pub mod package;
pub mod propset;
pub mod stream;

pub use element::{
    BlobDeclaration, BlobReference, CellManifest, DataElement, DataElementBody, DataElementPackage,
    DataElementType, ObjectData, ObjectDeclaration, ObjectGroup, ObjectGroupData,
    ObjectGroupDeclaration, RevisionManifest, RevisionManifestRootDeclare, StorageIndex,
    StorageIndexCellMapping, StorageIndexManifestMapping, StorageIndexRevisionMapping,
    StorageManifest, StorageManifestRootDeclare,
};
pub use error::{GraphError, GraphResult};
pub use group::{
    assemble, BlobMap, EncryptionObject, FileDataObject, RevisionStoreObject,
    RevisionStoreObjectGroup,
};
pub use package::{HeaderCell, Package, DATA_ROOT, ENCRYPTION_ROOT, HEADER_CELL_ROOT};
pub use propset::{
    ObjectSpaceObjectPropSet, PropertyId, PropertySet, PropertyType, PropertyValue,
    MAX_PROPERTY_SET_DEPTH,
};
pub use stream::{StreamObjectHeader, StreamObjectType};
