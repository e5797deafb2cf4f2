//! Package assembly.
//!
//! A [`Package`] ties the data elements of a [`DataElementPackage`] together:
//! the storage index maps cells and revisions to their manifest elements, the
//! storage manifest names the root cells, and each cell's revision chain
//! leads to the object groups that hold its objects.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::uuid;

use onestore_format::DecodeConfig;
use onestore_types::{CellId, ExtendedGuid};

use crate::element::{
    CellManifest, DataElement, DataElementBody, DataElementPackage, ObjectGroup, ObjectGroupData,
    ObjectGroupDeclaration, RevisionManifest, StorageIndex, StorageIndexCellMapping,
    StorageIndexRevisionMapping, StorageManifest,
};
use crate::error::{GraphError, GraphResult};
use crate::group::{assemble, BlobMap, RevisionStoreObjectGroup, PARTITION_PROPERTY_SET};
use crate::propset::ObjectSpaceObjectPropSet;

/// Storage manifest root of the header cell.
pub const HEADER_CELL_ROOT: ExtendedGuid =
    ExtendedGuid::new(uuid!("1A5A319C-C26B-41AA-B9C5-9BD8C44E5D7F"), 1);
/// Storage manifest root of the cell holding the document's data.
pub const DATA_ROOT: ExtendedGuid =
    ExtendedGuid::new(uuid!("84DEFAB9-AAA3-4A0D-A3A8-520C77AC7073"), 2);
/// Revision root declared by revisions whose object groups are encrypted.
pub const ENCRYPTION_ROOT: ExtendedGuid =
    ExtendedGuid::new(uuid!("4A3717F8-1C14-49E7-9526-81D942DE1741"), 3);

impl StorageIndex {
    /// The mapping for `cell_id`. More than one match is an error.
    pub fn find_cell_mapping(
        &self,
        cell_id: &CellId,
    ) -> GraphResult<Option<&StorageIndexCellMapping>> {
        find_unique(&self.cell_mappings, "storage index cell", cell_id, |m| &m.cell_id)
    }

    /// The mapping for `revision_id`. More than one match is an error.
    pub fn find_revision_mapping(
        &self,
        revision_id: &ExtendedGuid,
    ) -> GraphResult<Option<&StorageIndexRevisionMapping>> {
        find_unique(&self.revision_mappings, "storage index revision", revision_id, |m| {
            &m.revision_id
        })
    }
}

fn find_unique<'a, T, K: PartialEq + std::fmt::Display>(
    items: &'a [T],
    kind: &'static str,
    key: &K,
    key_of: impl Fn(&T) -> &K,
) -> GraphResult<Option<&'a T>> {
    let mut matches = items.iter().filter(|item| key_of(*item) == key);
    let first = matches.next();
    if matches.next().is_some() {
        return Err(GraphError::DuplicateMapping {
            kind,
            key: key.to_string(),
        });
    }
    Ok(first)
}

/// The decoded property set of the header cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCell {
    pub object_id: ExtendedGuid,
    pub property_set: ObjectSpaceObjectPropSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub storage_index: StorageIndex,
    pub storage_manifest: StorageManifest,
    pub header_cell: Option<HeaderCell>,
    pub cell_manifests: Vec<(CellId, CellManifest)>,
    /// Revisions of every root cell, each chain newest first.
    pub revision_manifests: Vec<RevisionManifest>,
    pub data_roots: Vec<RevisionStoreObjectGroup>,
    pub other_groups: Vec<RevisionStoreObjectGroup>,
}

impl Package {
    /// Decode a data element package and assemble it.
    pub fn decode(bytes: &[u8], config: &DecodeConfig) -> GraphResult<Self> {
        Self::build(&DataElementPackage::decode(bytes)?, config)
    }

    pub fn build(package: &DataElementPackage, config: &DecodeConfig) -> GraphResult<Self> {
        let elements = ElementIndex::new(package)?;
        let storage_index = elements.single("storage index", |b| match b {
            DataElementBody::StorageIndex(s) => Some(s),
            _ => None,
        })?;
        let storage_manifest = elements.single("storage manifest", |b| match b {
            DataElementBody::StorageManifest(s) => Some(s),
            _ => None,
        })?;

        let mut out = Package {
            storage_index: storage_index.clone(),
            storage_manifest: storage_manifest.clone(),
            header_cell: None,
            cell_manifests: Vec::new(),
            revision_manifests: Vec::new(),
            data_roots: Vec::new(),
            other_groups: Vec::new(),
        };

        for root in &storage_manifest.roots {
            let mapping = storage_index
                .find_cell_mapping(&root.cell_id)?
                .ok_or_else(|| GraphError::MissingElement {
                    kind: "storage index cell mapping",
                    id: root.cell_id.to_string(),
                })?;
            let chain = if mapping.mapping_id.is_nil() {
                Vec::new()
            } else {
                let manifest = elements.get(&mapping.mapping_id, "cell manifest", |b| match b {
                    DataElementBody::CellManifest(m) => Some(m),
                    _ => None,
                })?;
                out.cell_manifests.push((root.cell_id, manifest.clone()));
                revision_chain(&elements, storage_index, manifest.current_revision, config)?
            };
            debug!(
                root = %root.root_id,
                cell = %root.cell_id,
                revisions = chain.len(),
                "resolved root cell"
            );

            if root.root_id == HEADER_CELL_ROOT {
                out.header_cell = header_cell(&elements, &chain)?;
            } else {
                let groups = assemble_groups(&elements, &chain)?;
                if root.root_id == DATA_ROOT {
                    out.data_roots.extend(groups);
                } else {
                    out.other_groups.extend(groups);
                }
            }
            out.revision_manifests.extend(chain.into_iter().cloned());
        }

        debug!(
            elements = package.elements.len(),
            data_roots = out.data_roots.len(),
            other_groups = out.other_groups.len(),
            header_cell = out.header_cell.is_some(),
            "assembled package"
        );
        Ok(out)
    }

    pub fn find_storage_index_cell_mapping(
        &self,
        cell_id: &CellId,
    ) -> GraphResult<Option<&StorageIndexCellMapping>> {
        self.storage_index.find_cell_mapping(cell_id)
    }

    pub fn find_storage_index_revision_mapping(
        &self,
        revision_id: &ExtendedGuid,
    ) -> GraphResult<Option<&StorageIndexRevisionMapping>> {
        self.storage_index.find_revision_mapping(revision_id)
    }

    /// Every assembled group, data roots first.
    pub fn groups(&self) -> impl Iterator<Item = &RevisionStoreObjectGroup> {
        self.data_roots.iter().chain(&self.other_groups)
    }
}

/// Data elements by id, plus the object data BLOBs they carry.
struct ElementIndex<'a> {
    package: &'a DataElementPackage,
    by_id: HashMap<ExtendedGuid, &'a DataElement>,
    blobs: BlobMap<'a>,
}

impl<'a> ElementIndex<'a> {
    fn new(package: &'a DataElementPackage) -> GraphResult<Self> {
        let mut by_id = HashMap::with_capacity(package.elements.len());
        let mut blobs = BlobMap::new();
        for element in &package.elements {
            if by_id.insert(element.id, element).is_some() {
                return Err(GraphError::DuplicateMapping {
                    kind: "data element",
                    key: element.id.to_string(),
                });
            }
            if let DataElementBody::ObjectDataBlob(bytes) = &element.body {
                blobs.insert(element.id, bytes.as_slice());
            }
        }
        Ok(Self { package, by_id, blobs })
    }

    fn get<T>(
        &self,
        id: &ExtendedGuid,
        kind: &'static str,
        select: impl Fn(&'a DataElementBody) -> Option<&'a T>,
    ) -> GraphResult<&'a T> {
        self.by_id
            .get(id)
            .and_then(|&element| select(&element.body))
            .ok_or_else(|| GraphError::MissingElement { kind, id: id.to_string() })
    }

    /// The one element of a kind that must occur exactly once.
    fn single<T>(
        &self,
        kind: &'static str,
        select: impl Fn(&'a DataElementBody) -> Option<&'a T>,
    ) -> GraphResult<&'a T> {
        let package: &'a DataElementPackage = self.package;
        let mut found = package
            .elements
            .iter()
            .filter_map(|element| select(&element.body).map(|body| (element.id, body)));
        let (id, first) = found.next().ok_or_else(|| GraphError::MissingElement {
            kind,
            id: ExtendedGuid::nil().to_string(),
        })?;
        if found.next().is_some() {
            return Err(GraphError::DuplicateMapping {
                kind,
                key: id.to_string(),
            });
        }
        Ok(first)
    }
}

/// Follow base-revision links from `current` until a nil id.
fn revision_chain<'a>(
    elements: &ElementIndex<'a>,
    storage_index: &StorageIndex,
    current: ExtendedGuid,
    config: &DecodeConfig,
) -> GraphResult<Vec<&'a RevisionManifest>> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut revision_id = current;
    while !revision_id.is_nil() {
        if !visited.insert(revision_id) {
            return Err(GraphError::framing(
                0,
                format!("revision chain loops back to {revision_id}"),
            ));
        }
        if chain.len() >= config.max_revision_chain {
            return Err(GraphError::framing(
                0,
                format!("revision chain exceeds {} revisions", config.max_revision_chain),
            ));
        }
        let mapping = storage_index
            .find_revision_mapping(&revision_id)?
            .ok_or_else(|| GraphError::MissingElement {
                kind: "storage index revision mapping",
                id: revision_id.to_string(),
            })?;
        let manifest = elements.get(&mapping.mapping_id, "revision manifest", |b| match b {
            DataElementBody::RevisionManifest(m) => Some(m),
            _ => None,
        })?;
        if manifest.revision_id != revision_id {
            warn!(
                expected = %revision_id,
                found = %manifest.revision_id,
                "revision manifest id differs from mapping"
            );
        }
        chain.push(manifest);
        revision_id = manifest.base_revision_id;
    }
    Ok(chain)
}

fn object_group<'a>(
    elements: &ElementIndex<'a>,
    id: &ExtendedGuid,
) -> GraphResult<&'a ObjectGroup> {
    elements.get(id, "object group", |b| match b {
        DataElementBody::ObjectGroup(g) => Some(g),
        _ => None,
    })
}

fn assemble_groups(
    elements: &ElementIndex<'_>,
    chain: &[&RevisionManifest],
) -> GraphResult<Vec<RevisionStoreObjectGroup>> {
    let mut groups = Vec::new();
    for revision in chain {
        let encrypted = revision.root_object(&ENCRYPTION_ROOT).is_some();
        for group_id in &revision.object_group_references {
            let group = object_group(elements, group_id)?;
            groups.push(assemble(*group_id, group, encrypted, &elements.blobs)?);
        }
    }
    Ok(groups)
}

/// Decode the property-set record of the newest header cell revision.
fn header_cell(
    elements: &ElementIndex<'_>,
    chain: &[&RevisionManifest],
) -> GraphResult<Option<HeaderCell>> {
    for revision in chain {
        for group_id in &revision.object_group_references {
            let group = object_group(elements, group_id)?;
            let found = group.declarations.iter().zip(&group.data).find_map(|pair| match pair {
                (ObjectGroupDeclaration::Object(d), ObjectGroupData::Object(record))
                    if d.partition == PARTITION_PROPERTY_SET =>
                {
                    Some((d.object_id, record))
                }
                _ => None,
            });
            if let Some((object_id, record)) = found {
                return Ok(Some(HeaderCell {
                    object_id,
                    property_set: ObjectSpaceObjectPropSet::decode(&record.data)?,
                }));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onestore_types::SerialNumber;
    use uuid::Uuid;

    fn xg(v: u128, n: u32) -> ExtendedGuid {
        ExtendedGuid::new(Uuid::from_u128(v), n)
    }

    fn cell(v: u128) -> CellId {
        CellId::new(xg(v, 1), xg(v, 2))
    }

    #[test]
    fn lookups_find_single_matches() {
        let index = StorageIndex {
            manifest_mappings: vec![],
            cell_mappings: vec![StorageIndexCellMapping {
                cell_id: cell(1),
                mapping_id: xg(2, 1),
                serial: SerialNumber::default(),
            }],
            revision_mappings: vec![StorageIndexRevisionMapping {
                revision_id: xg(3, 1),
                mapping_id: xg(4, 1),
                serial: SerialNumber::default(),
            }],
        };
        assert_eq!(index.find_cell_mapping(&cell(1)).unwrap().unwrap().mapping_id, xg(2, 1));
        assert!(index.find_cell_mapping(&cell(9)).unwrap().is_none());
        assert_eq!(index.find_revision_mapping(&xg(3, 1)).unwrap().unwrap().mapping_id, xg(4, 1));
        assert!(index.find_revision_mapping(&xg(3, 2)).unwrap().is_none());
    }

    #[test]
    fn duplicate_revision_mapping_fails() {
        let mapping = StorageIndexRevisionMapping {
            revision_id: xg(3, 1),
            mapping_id: xg(4, 1),
            serial: SerialNumber::default(),
        };
        let index = StorageIndex {
            revision_mappings: vec![mapping.clone(), mapping],
            ..Default::default()
        };
        let err = index.find_revision_mapping(&xg(3, 1)).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateMapping { kind: "storage index revision", .. }));
    }

    #[test]
    fn well_known_roots() {
        assert_eq!(
            HEADER_CELL_ROOT.to_string().to_uppercase(),
            "{1A5A319C-C26B-41AA-B9C5-9BD8C44E5D7F},1"
        );
        assert_eq!(DATA_ROOT.n, 2);
        assert_eq!(ENCRYPTION_ROOT.n, 3);
    }
}
