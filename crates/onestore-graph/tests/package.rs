use onestore_format::DecodeConfig;
use onestore_graph::{
    BlobDeclaration, BlobReference, CellManifest, DataElement, DataElementBody, DataElementPackage,
    GraphError, ObjectData, ObjectDeclaration, ObjectGroup, ObjectGroupData, ObjectGroupDeclaration,
    ObjectSpaceObjectPropSet, Package, PropertyId, PropertySet, PropertyType, PropertyValue,
    RevisionManifest, RevisionManifestRootDeclare, StorageIndex, StorageIndexCellMapping,
    StorageIndexRevisionMapping, StorageManifest, StorageManifestRootDeclare, DATA_ROOT,
    ENCRYPTION_ROOT, HEADER_CELL_ROOT,
};
use onestore_types::{CellId, CompactId, ExtendedGuid, Jcid, SerialNumber};
use uuid::Uuid;

fn xg(v: u128, n: u32) -> ExtendedGuid {
    ExtendedGuid::new(Uuid::from_u128(v), n)
}

fn cell(v: u128) -> CellId {
    CellId::new(xg(v, 1), xg(v, 2))
}

const HEADER_CELL: u128 = 0xC0;
const DATA_CELL: u128 = 0xC1;
const EMPTY_CELL: u128 = 0xC2;

fn cell_mapping(cell_id: CellId, manifest: ExtendedGuid) -> StorageIndexCellMapping {
    StorageIndexCellMapping {
        cell_id,
        mapping_id: manifest,
        serial: SerialNumber::default(),
    }
}

fn revision_mapping(revision: ExtendedGuid, manifest: ExtendedGuid) -> StorageIndexRevisionMapping {
    StorageIndexRevisionMapping {
        revision_id: revision,
        mapping_id: manifest,
        serial: SerialNumber::default(),
    }
}

fn revision(id: ExtendedGuid, base: ExtendedGuid, groups: Vec<ExtendedGuid>) -> DataElementBody {
    DataElementBody::RevisionManifest(RevisionManifest {
        revision_id: id,
        base_revision_id: base,
        root_declares: vec![],
        object_group_references: groups,
    })
}

fn record(
    object: ExtendedGuid,
    partition: u64,
    bytes: Vec<u8>,
    refs: Vec<ExtendedGuid>,
) -> (ObjectGroupDeclaration, ObjectGroupData) {
    (
        ObjectGroupDeclaration::Object(ObjectDeclaration {
            object_id: object,
            partition,
            data_size: bytes.len() as u64,
            object_refs_count: refs.len() as u64,
            cell_refs_count: 0,
        }),
        ObjectGroupData::Object(ObjectData {
            object_ids: refs,
            cell_ids: vec![],
            data: bytes,
        }),
    )
}

fn group(records: Vec<(ObjectGroupDeclaration, ObjectGroupData)>) -> DataElementBody {
    let (declarations, data) = records.into_iter().unzip();
    DataElementBody::ObjectGroup(ObjectGroup {
        declarations,
        metadata: None,
        data,
    })
}

fn props(value: u32) -> Vec<u8> {
    ObjectSpaceObjectPropSet::from_property_set(PropertySet {
        values: vec![
            (PropertyId::new(0x1C01, PropertyType::FourBytes), PropertyValue::U32(value)),
            (
                PropertyId::new(0x2002, PropertyType::ObjectId),
                PropertyValue::ObjectId(CompactId::new(1, 1).unwrap()),
            ),
        ],
    })
    .encode()
    .unwrap()
}

fn jcid(j: Jcid) -> Vec<u8> {
    j.to_u32().to_le_bytes().to_vec()
}

/// Header cell with one revision, data cell with two, and a third root cell
/// whose mapping has no manifest.
fn elements() -> Vec<DataElement> {
    let page = xg(0x10, 1);
    let picture = xg(0x10, 2);
    let blob_id = xg(0xB0, 1);

    vec![
        DataElement::new(
            xg(1, 1),
            DataElementBody::StorageIndex(StorageIndex {
                manifest_mappings: vec![],
                cell_mappings: vec![
                    cell_mapping(cell(HEADER_CELL), xg(0x20, 1)),
                    cell_mapping(cell(DATA_CELL), xg(0x20, 2)),
                    cell_mapping(cell(EMPTY_CELL), ExtendedGuid::nil()),
                ],
                revision_mappings: vec![
                    revision_mapping(xg(0x30, 1), xg(0x40, 1)),
                    revision_mapping(xg(0x30, 2), xg(0x40, 2)),
                    revision_mapping(xg(0x30, 3), xg(0x40, 3)),
                ],
            }),
        ),
        DataElement::new(
            xg(2, 1),
            DataElementBody::StorageManifest(StorageManifest {
                schema_guid: Uuid::from_u128(0x5C4E),
                roots: vec![
                    StorageManifestRootDeclare {
                        root_id: HEADER_CELL_ROOT,
                        cell_id: cell(HEADER_CELL),
                    },
                    StorageManifestRootDeclare {
                        root_id: DATA_ROOT,
                        cell_id: cell(DATA_CELL),
                    },
                    StorageManifestRootDeclare {
                        root_id: xg(0x77, 7),
                        cell_id: cell(EMPTY_CELL),
                    },
                ],
            }),
        ),
        DataElement::new(
            xg(0x20, 1),
            DataElementBody::CellManifest(CellManifest {
                current_revision: xg(0x30, 1),
            }),
        ),
        DataElement::new(
            xg(0x20, 2),
            DataElementBody::CellManifest(CellManifest {
                current_revision: xg(0x30, 3),
            }),
        ),
        DataElement::new(
            xg(0x40, 1),
            revision(xg(0x30, 1), ExtendedGuid::nil(), vec![xg(0x50, 1)]),
        ),
        // Data cell: revision 3 builds on revision 2.
        DataElement::new(
            xg(0x40, 2),
            revision(xg(0x30, 2), ExtendedGuid::nil(), vec![xg(0x50, 2)]),
        ),
        DataElement::new(xg(0x40, 3), revision(xg(0x30, 3), xg(0x30, 2), vec![xg(0x50, 3)])),
        DataElement::new(xg(0x50, 1), group(vec![record(xg(0x11, 1), 1, props(1), vec![])])),
        DataElement::new(
            xg(0x50, 2),
            DataElementBody::ObjectGroup(ObjectGroup {
                declarations: vec![
                    record(picture, 4, jcid(Jcid::new(0x35, false, true)), vec![]).0,
                    record(picture, 1, b"PNG bytes".to_vec(), vec![]).0,
                    ObjectGroupDeclaration::Blob(BlobDeclaration {
                        object_id: xg(0x10, 3),
                        blob_id,
                        partition: 2,
                        object_refs_count: 0,
                        cell_refs_count: 0,
                    }),
                    record(xg(0x10, 3), 4, jcid(Jcid::new(0x36, false, true)), vec![]).0,
                ],
                metadata: Some(vec![0, 0, 0, 0]),
                data: vec![
                    record(picture, 4, jcid(Jcid::new(0x35, false, true)), vec![]).1,
                    record(picture, 1, b"PNG bytes".to_vec(), vec![xg(0x99, 9)]).1,
                    ObjectGroupData::BlobReference(BlobReference {
                        object_ids: vec![],
                        cell_ids: vec![],
                        blob_id,
                    }),
                    record(xg(0x10, 3), 4, jcid(Jcid::new(0x36, false, true)), vec![]).1,
                ],
            }),
        ),
        DataElement::new(
            xg(0x50, 3),
            group(vec![
                record(page, 4, jcid(Jcid::new(0x0B, true, false)), vec![]),
                record(page, 1, props(42), vec![picture]),
            ]),
        ),
        DataElement::new(blob_id, DataElementBody::ObjectDataBlob(vec![7; 300])),
    ]
}

fn decode(elements: Vec<DataElement>) -> Result<Package, GraphError> {
    let bytes = DataElementPackage::new(elements).encode().unwrap();
    Package::decode(&bytes, &DecodeConfig::default())
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[test]
fn assembles_roots_revisions_and_groups() {
    let package = decode(elements()).unwrap();

    // Header cell revision plus both data revisions, newest first per cell.
    let revisions: Vec<_> = package.revision_manifests.iter().map(|r| r.revision_id).collect();
    assert_eq!(revisions, vec![xg(0x30, 1), xg(0x30, 3), xg(0x30, 2)]);
    assert_eq!(package.cell_manifests.len(), 2);

    let header = package.header_cell.as_ref().unwrap();
    assert_eq!(header.object_id, xg(0x11, 1));
    assert_eq!(header.property_set.body.get(0x1C01), Some(&PropertyValue::U32(1)));

    assert_eq!(package.data_roots.len(), 2);
    assert!(package.other_groups.is_empty());

    let page = package.data_roots[0].object(&xg(0x10, 1)).unwrap();
    let props = page.property_set.as_ref().unwrap();
    assert_eq!(props.body.get(0x1C01), Some(&PropertyValue::U32(42)));
    assert_eq!(page.referenced_object_ids, vec![xg(0x10, 2)]);
}

#[test]
fn file_data_object_carries_bytes_not_properties() {
    let package = decode(elements()).unwrap();
    let older = &package.data_roots[1];

    let picture = older.object(&xg(0x10, 2)).unwrap();
    assert!(picture.is_file_data());
    assert_eq!(picture.file_data.as_deref(), Some(&b"PNG bytes"[..]));
    assert!(picture.property_set.is_none());
    assert!(picture.referenced_object_ids.is_empty());

    let blob = older.object(&xg(0x10, 3)).unwrap().file_data_object.as_ref().unwrap();
    assert_eq!(blob.data.as_ref().map(Vec::len), Some(300));
}

#[test]
fn mapping_lookups() {
    let package = decode(elements()).unwrap();
    let mapping = package.find_storage_index_cell_mapping(&cell(DATA_CELL)).unwrap().unwrap();
    assert_eq!(mapping.mapping_id, xg(0x20, 2));
    assert!(package.find_storage_index_cell_mapping(&cell(0xFF)).unwrap().is_none());
    let mapping = package.find_storage_index_revision_mapping(&xg(0x30, 2)).unwrap().unwrap();
    assert_eq!(mapping.mapping_id, xg(0x40, 2));
}

#[test]
fn package_with_empty_revision_chain() {
    let elements = vec![
        DataElement::new(
            xg(1, 1),
            DataElementBody::StorageIndex(StorageIndex {
                cell_mappings: vec![cell_mapping(cell(DATA_CELL), xg(0x20, 1))],
                ..Default::default()
            }),
        ),
        DataElement::new(
            xg(2, 1),
            DataElementBody::StorageManifest(StorageManifest {
                schema_guid: Uuid::from_u128(1),
                roots: vec![StorageManifestRootDeclare {
                    root_id: DATA_ROOT,
                    cell_id: cell(DATA_CELL),
                }],
            }),
        ),
        DataElement::new(
            xg(0x20, 1),
            DataElementBody::CellManifest(CellManifest {
                current_revision: ExtendedGuid::nil(),
            }),
        ),
    ];
    let package = decode(elements).unwrap();
    assert!(package.revision_manifests.is_empty());
    assert!(package.data_roots.is_empty());
    assert!(package.header_cell.is_none());
}

#[test]
fn encrypted_revision_keeps_groups_opaque() {
    let mut elements = elements();
    for element in &mut elements {
        if let DataElementBody::RevisionManifest(r) = &mut element.body {
            if r.revision_id == xg(0x30, 3) {
                r.root_declares.push(RevisionManifestRootDeclare {
                    root_id: ENCRYPTION_ROOT,
                    object_id: xg(0xEE, 1),
                });
            }
        }
    }
    let package = decode(elements).unwrap();
    assert!(package.data_roots[0].is_encrypted());
    assert!(package.data_roots[0].objects.is_empty());
    assert!(!package.data_roots[1].is_encrypted());
}

#[test]
fn package_serializes_to_json() {
    let package = decode(elements()).unwrap();
    let json = serde_json::to_value(&package).unwrap();
    assert_eq!(json["data_roots"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn revision_cycle_is_framing_error() {
    let mut elements = elements();
    for element in &mut elements {
        if let DataElementBody::RevisionManifest(r) = &mut element.body {
            if r.revision_id == xg(0x30, 2) {
                r.base_revision_id = xg(0x30, 3);
            }
        }
    }
    assert!(matches!(decode(elements), Err(GraphError::MalformedFraming { .. })));
}

#[test]
fn revision_chain_is_bounded_by_config() {
    let bytes = DataElementPackage::new(elements()).encode().unwrap();
    let config = DecodeConfig {
        max_revision_chain: 1,
        ..DecodeConfig::default()
    };
    let err = Package::decode(&bytes, &config).unwrap_err();
    assert!(matches!(err, GraphError::MalformedFraming { .. }));
}

#[test]
fn duplicate_cell_mapping_is_rejected() {
    let mut elements = elements();
    if let DataElementBody::StorageIndex(index) = &mut elements[0].body {
        index.cell_mappings.push(cell_mapping(cell(DATA_CELL), xg(0x20, 9)));
    }
    let err = decode(elements).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateMapping { .. }));
}

#[test]
fn unknown_partition_fails_package() {
    let mut elements = elements();
    elements.push(DataElement::new(
        xg(0x50, 9),
        group(vec![record(xg(0x12, 1), 7, vec![0], vec![])]),
    ));
    for element in &mut elements {
        if let DataElementBody::RevisionManifest(r) = &mut element.body {
            if r.revision_id == xg(0x30, 3) {
                r.object_group_references.push(xg(0x50, 9));
            }
        }
    }
    let err = decode(elements).unwrap_err();
    assert!(matches!(err, GraphError::UnrecognizedPartition { partition: 7, .. }));
}

#[test]
fn missing_revision_manifest_is_reported() {
    let mut elements = elements();
    elements.retain(|e| e.id != xg(0x40, 2));
    let err = decode(elements).unwrap_err();
    assert!(matches!(err, GraphError::MissingElement { kind: "revision manifest", .. }));
}
