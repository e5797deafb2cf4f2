//! Object group assembly.
//!
//! An object group declares its objects partition by partition and carries
//! one data record per declaration, in the same order. Records that share an
//! object id describe the same logical object: the class-id partition gives
//! its [`Jcid`], the property-set partition its payload. Assembly merges them
//! into one [`RevisionStoreObject`] per id, in first-seen order.
//!
//! The payload is interpreted only after every record has been merged, so a
//! property-set record arriving before its class-id record is handled the
//! same as the reverse. File data, inline or in a BLOB, is attached only to
//! objects whose class id marks them as file data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use onestore_types::{ByteCursor, CellId, ExtendedGuid, Jcid};

use crate::element::{
    BlobDeclaration, BlobReference, ObjectGroup, ObjectGroupData, ObjectGroupDeclaration,
};
use crate::error::{GraphError, GraphResult};
use crate::propset::ObjectSpaceObjectPropSet;

/// Partition holding an object's property set, or its bytes for file data.
pub const PARTITION_PROPERTY_SET: u64 = 1;
/// Partition of a BLOB declaration holding file data.
pub const PARTITION_FILE_DATA: u64 = 2;
/// Partition holding an object's class id.
pub const PARTITION_CLASS_ID: u64 = 4;

/// File data stored in a separate object data BLOB.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDataObject {
    pub declaration: BlobDeclaration,
    pub reference: BlobReference,
    /// The BLOB's bytes, when the package contains it.
    pub data: Option<Vec<u8>>,
}

/// An undecoded record pair from an encrypted group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionObject {
    pub declaration: ObjectGroupDeclaration,
    pub data: ObjectGroupData,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionStoreObject {
    pub id: ExtendedGuid,
    pub group_id: ExtendedGuid,
    pub jcid: Option<Jcid>,
    pub property_set: Option<ObjectSpaceObjectPropSet>,
    /// Inline bytes of a file data object.
    pub file_data: Option<Vec<u8>>,
    pub file_data_object: Option<FileDataObject>,
    pub referenced_object_ids: Vec<ExtendedGuid>,
    pub referenced_cell_ids: Vec<CellId>,
}

impl RevisionStoreObject {
    fn new(id: ExtendedGuid, group_id: ExtendedGuid) -> Self {
        Self {
            id,
            group_id,
            jcid: None,
            property_set: None,
            file_data: None,
            file_data_object: None,
            referenced_object_ids: Vec::new(),
            referenced_cell_ids: Vec::new(),
        }
    }

    pub fn is_file_data(&self) -> bool {
        self.jcid.is_some_and(Jcid::is_file_data)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionStoreObjectGroup {
    pub group_id: ExtendedGuid,
    pub objects: Vec<RevisionStoreObject>,
    pub encryption_objects: Vec<EncryptionObject>,
}

impl RevisionStoreObjectGroup {
    pub fn object(&self, id: &ExtendedGuid) -> Option<&RevisionStoreObject> {
        self.objects.iter().find(|o| &o.id == id)
    }

    pub fn is_encrypted(&self) -> bool {
        !self.encryption_objects.is_empty()
    }
}

/// Lookup of object data BLOB bytes by BLOB id.
pub type BlobMap<'a> = HashMap<ExtendedGuid, &'a [u8]>;

/// The property-set partition of an object, held until its class is known.
struct PendingPayload {
    data: Vec<u8>,
    object_ids: Vec<ExtendedGuid>,
    cell_ids: Vec<CellId>,
}

/// Assemble one object group.
///
/// With `encrypted` set, record pairs are kept as [`EncryptionObject`]s and
/// nothing is interpreted.
pub fn assemble(
    group_id: ExtendedGuid,
    group: &ObjectGroup,
    encrypted: bool,
    blobs: &BlobMap<'_>,
) -> GraphResult<RevisionStoreObjectGroup> {
    if group.declarations.len() != group.data.len() {
        return Err(GraphError::framing(
            0,
            format!(
                "object group {group_id} has {} declarations but {} data records",
                group.declarations.len(),
                group.data.len()
            ),
        ));
    }
    let pairs = group.declarations.iter().zip(&group.data);

    if encrypted {
        let encryption_objects: Vec<_> = pairs
            .map(|(declaration, data)| EncryptionObject {
                declaration: declaration.clone(),
                data: data.clone(),
            })
            .collect();
        debug!(
            group = %group_id,
            records = encryption_objects.len(),
            "kept encrypted object group"
        );
        return Ok(RevisionStoreObjectGroup {
            group_id,
            objects: Vec::new(),
            encryption_objects,
        });
    }

    let mut objects: Vec<RevisionStoreObject> = Vec::new();
    let mut payloads: Vec<Option<PendingPayload>> = Vec::new();
    let mut files: Vec<Option<FileDataObject>> = Vec::new();
    let mut index: HashMap<ExtendedGuid, usize> = HashMap::new();

    for (position, (declaration, data)) in pairs.enumerate() {
        let id = declaration.object_id();
        let slot = *index.entry(id).or_insert_with(|| {
            objects.push(RevisionStoreObject::new(id, group_id));
            payloads.push(None);
            files.push(None);
            objects.len() - 1
        });
        let object = &mut objects[slot];
        let duplicate = || {
            GraphError::framing(
                0,
                format!(
                    "object {id} in group {group_id} declares partition {} twice",
                    declaration.partition()
                ),
            )
        };

        match (declaration, data) {
            (ObjectGroupDeclaration::Object(d), ObjectGroupData::Object(record)) => {
                match d.partition {
                    PARTITION_CLASS_ID => {
                        if object.jcid.is_some() {
                            return Err(duplicate());
                        }
                        object.jcid = Some(Jcid::read(&mut ByteCursor::new(&record.data))?);
                    }
                    PARTITION_PROPERTY_SET => {
                        if payloads[slot].is_some() {
                            return Err(duplicate());
                        }
                        payloads[slot] = Some(PendingPayload {
                            data: record.data.clone(),
                            object_ids: record.object_ids.clone(),
                            cell_ids: record.cell_ids.clone(),
                        });
                    }
                    partition => {
                        return Err(GraphError::UnrecognizedPartition {
                            group: group_id,
                            object: id,
                            partition,
                        })
                    }
                }
            }
            (ObjectGroupDeclaration::Blob(d), ObjectGroupData::BlobReference(reference)) => {
                if d.partition != PARTITION_FILE_DATA {
                    return Err(GraphError::UnrecognizedPartition {
                        group: group_id,
                        object: id,
                        partition: d.partition,
                    });
                }
                if files[slot].is_some() {
                    return Err(duplicate());
                }
                files[slot] = Some(FileDataObject {
                    declaration: d.clone(),
                    reference: reference.clone(),
                    data: blobs.get(&reference.blob_id).map(|bytes| bytes.to_vec()),
                });
            }
            _ => {
                return Err(GraphError::framing(
                    0,
                    format!("record {position} of group {group_id} pairs mismatched kinds"),
                ))
            }
        }
    }

    for ((object, payload), file) in objects.iter_mut().zip(payloads).zip(files) {
        if let Some(file) = file {
            if object.is_file_data() {
                object.file_data_object = Some(file);
            } else {
                debug!(
                    group = %group_id,
                    object = %object.id,
                    blob = %file.reference.blob_id,
                    "dropped BLOB of an object without a file data class"
                );
            }
        }
        let Some(payload) = payload else { continue };
        if object.is_file_data() {
            object.file_data = Some(payload.data);
        } else {
            object.property_set = Some(ObjectSpaceObjectPropSet::decode(&payload.data)?);
            object.referenced_object_ids = payload.object_ids;
            object.referenced_cell_ids = payload.cell_ids;
        }
    }

    debug!(group = %group_id, objects = objects.len(), "assembled object group");
    Ok(RevisionStoreObjectGroup {
        group_id,
        objects,
        encryption_objects: Vec::new(),
    })
}
