//! Property sets.
//!
//! An [`ObjectSpaceObjectPropSet`] is the payload of an object's property-set
//! partition. Object, object space and context references are not stored
//! inline: each lives in its own stream of [`CompactId`]s ahead of the
//! property set, and properties of reference type consume entries from the
//! matching stream in order.

use serde::{Deserialize, Serialize};

use onestore_types::{ByteCursor, ByteWriter, CompactId};

use crate::error::{GraphError, GraphResult};

// ---------------------------------------------------------------------------
// Property ids
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    NoData,
    Bool,
    OneByte,
    TwoBytes,
    FourBytes,
    EightBytes,
    FourBytesLengthAndData,
    ObjectId,
    ArrayOfObjectIds,
    ObjectSpaceId,
    ArrayOfObjectSpaceIds,
    ContextId,
    ArrayOfContextIds,
    ArrayOfPropertyValues,
    PropertySet,
}

impl PropertyType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::NoData,
            0x02 => Self::Bool,
            0x03 => Self::OneByte,
            0x04 => Self::TwoBytes,
            0x05 => Self::FourBytes,
            0x06 => Self::EightBytes,
            0x07 => Self::FourBytesLengthAndData,
            0x08 => Self::ObjectId,
            0x09 => Self::ArrayOfObjectIds,
            0x0A => Self::ObjectSpaceId,
            0x0B => Self::ArrayOfObjectSpaceIds,
            0x0C => Self::ContextId,
            0x0D => Self::ArrayOfContextIds,
            0x10 => Self::ArrayOfPropertyValues,
            0x11 => Self::PropertySet,
            _ => return None,
        })
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoData => 0x01,
            Self::Bool => 0x02,
            Self::OneByte => 0x03,
            Self::TwoBytes => 0x04,
            Self::FourBytes => 0x05,
            Self::EightBytes => 0x06,
            Self::FourBytesLengthAndData => 0x07,
            Self::ObjectId => 0x08,
            Self::ArrayOfObjectIds => 0x09,
            Self::ObjectSpaceId => 0x0A,
            Self::ArrayOfObjectSpaceIds => 0x0B,
            Self::ContextId => 0x0C,
            Self::ArrayOfContextIds => 0x0D,
            Self::ArrayOfPropertyValues => 0x10,
            Self::PropertySet => 0x11,
        }
    }
}

/// A 32-bit property identifier: 26-bit id, 5-bit type and the value of a
/// boolean property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId {
    pub id: u32,
    pub prop_type: PropertyType,
    pub bool_value: bool,
}

impl PropertyId {
    pub const MAX_ID: u32 = (1 << 26) - 1;

    pub fn new(id: u32, prop_type: PropertyType) -> Self {
        Self {
            id: id & Self::MAX_ID,
            prop_type,
            bool_value: false,
        }
    }

    fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let offset = cursor.offset();
        let raw = cursor.read_u32()?;
        let type_code = ((raw >> 26) & 0x1F) as u8;
        let prop_type = PropertyType::from_u8(type_code).ok_or_else(|| {
            GraphError::framing(offset, format!("unknown property type {type_code:#04x}"))
        })?;
        Ok(Self {
            id: raw & Self::MAX_ID,
            prop_type,
            bool_value: raw >> 31 == 1,
        })
    }

    pub fn to_u32(self) -> u32 {
        (self.id & Self::MAX_ID)
            | (self.prop_type.to_u8() as u32) << 26
            | (self.bool_value as u32) << 31
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Nested property sets and property value arrays deeper than this are rejected.
pub const MAX_PROPERTY_SET_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    NoData,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
    ObjectId(CompactId),
    ObjectIds(Vec<CompactId>),
    ObjectSpaceId(CompactId),
    ObjectSpaceIds(Vec<CompactId>),
    ContextId(CompactId),
    ContextIds(Vec<CompactId>),
    /// Element id (absent when the array is empty) and elements.
    PropertyValues(Option<PropertyId>, Vec<PropertySet>),
    PropertySet(PropertySet),
}

/// The id streams consumed while reading a property set.
struct IdStreams<'a> {
    oids: std::slice::Iter<'a, CompactId>,
    osids: std::slice::Iter<'a, CompactId>,
    context_ids: std::slice::Iter<'a, CompactId>,
}

impl IdStreams<'_> {
    fn take(
        stream: &mut std::slice::Iter<'_, CompactId>,
        count: usize,
        name: &str,
        offset: u64,
    ) -> GraphResult<Vec<CompactId>> {
        if stream.len() < count {
            return Err(GraphError::framing(
                offset,
                format!("property needs {count} {name} but {} remain", stream.len()),
            ));
        }
        Ok(stream.by_ref().take(count).copied().collect())
    }

    fn take_one(
        stream: &mut std::slice::Iter<'_, CompactId>,
        name: &str,
        offset: u64,
    ) -> GraphResult<CompactId> {
        stream.next().copied().ok_or_else(|| {
            GraphError::framing(offset, format!("property needs an entry in the {name} stream"))
        })
    }
}

/// Reference ids gathered in stream order.
#[derive(Default)]
struct IdCollector {
    oids: Vec<CompactId>,
    osids: Vec<CompactId>,
    context_ids: Vec<CompactId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
    pub values: Vec<(PropertyId, PropertyValue)>,
}

impl PropertySet {
    pub fn get(&self, id: u32) -> Option<&PropertyValue> {
        self.values.iter().find(|(p, _)| p.id == id).map(|(_, v)| v)
    }

    fn read(
        cursor: &mut ByteCursor<'_>,
        streams: &mut IdStreams<'_>,
        depth: usize,
    ) -> GraphResult<Self> {
        if depth > MAX_PROPERTY_SET_DEPTH {
            return Err(GraphError::framing(
                cursor.offset(),
                format!("property sets nested deeper than {MAX_PROPERTY_SET_DEPTH}"),
            ));
        }
        let count = cursor.read_u16()? as usize;
        let ids = (0..count)
            .map(|_| PropertyId::read(cursor))
            .collect::<GraphResult<Vec<_>>>()?;
        let mut values = Vec::with_capacity(count);
        for id in ids {
            let value = read_value(cursor, id, streams, depth)?;
            values.push((id, value));
        }
        Ok(Self { values })
    }

    fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        let count = u16::try_from(self.values.len()).map_err(|_| {
            GraphError::framing(
                0,
                format!("{} properties do not fit a property set", self.values.len()),
            )
        })?;
        writer.put_u16(count);
        for (id, value) in &self.values {
            let mut id = *id;
            if let PropertyValue::Bool(b) = value {
                id.bool_value = *b;
            }
            writer.put_u32(id.to_u32());
        }
        for (_, value) in &self.values {
            write_value(writer, value)?;
        }
        Ok(())
    }

    fn collect_ids(&self, ids: &mut IdCollector) {
        for (_, value) in &self.values {
            match value {
                PropertyValue::ObjectId(id) => ids.oids.push(*id),
                PropertyValue::ObjectIds(list) => ids.oids.extend_from_slice(list),
                PropertyValue::ObjectSpaceId(id) => ids.osids.push(*id),
                PropertyValue::ObjectSpaceIds(list) => ids.osids.extend_from_slice(list),
                PropertyValue::ContextId(id) => ids.context_ids.push(*id),
                PropertyValue::ContextIds(list) => ids.context_ids.extend_from_slice(list),
                PropertyValue::PropertyValues(_, sets) => {
                    sets.iter().for_each(|set| set.collect_ids(ids))
                }
                PropertyValue::PropertySet(set) => set.collect_ids(ids),
                _ => {}
            }
        }
    }

    /// Object ids referenced anywhere in the set, in stream order.
    pub fn referenced_object_ids(&self) -> Vec<CompactId> {
        let mut ids = IdCollector::default();
        self.collect_ids(&mut ids);
        ids.oids
    }
}

fn read_value(
    cursor: &mut ByteCursor<'_>,
    id: PropertyId,
    streams: &mut IdStreams<'_>,
    depth: usize,
) -> GraphResult<PropertyValue> {
    let offset = cursor.offset();
    Ok(match id.prop_type {
        PropertyType::NoData => PropertyValue::NoData,
        PropertyType::Bool => PropertyValue::Bool(id.bool_value),
        PropertyType::OneByte => PropertyValue::U8(cursor.read_u8()?),
        PropertyType::TwoBytes => PropertyValue::U16(cursor.read_u16()?),
        PropertyType::FourBytes => PropertyValue::U32(cursor.read_u32()?),
        PropertyType::EightBytes => PropertyValue::U64(cursor.read_u64()?),
        PropertyType::FourBytesLengthAndData => {
            let len = cursor.read_u32()? as usize;
            PropertyValue::Bytes(cursor.read_bytes(len)?.to_vec())
        }
        PropertyType::ObjectId => {
            PropertyValue::ObjectId(IdStreams::take_one(&mut streams.oids, "object id", offset)?)
        }
        PropertyType::ArrayOfObjectIds => {
            let count = cursor.read_u32()? as usize;
            let ids = IdStreams::take(&mut streams.oids, count, "object ids", offset)?;
            PropertyValue::ObjectIds(ids)
        }
        PropertyType::ObjectSpaceId => {
            let id = IdStreams::take_one(&mut streams.osids, "object space id", offset)?;
            PropertyValue::ObjectSpaceId(id)
        }
        PropertyType::ArrayOfObjectSpaceIds => {
            let count = cursor.read_u32()? as usize;
            let ids = IdStreams::take(&mut streams.osids, count, "object space ids", offset)?;
            PropertyValue::ObjectSpaceIds(ids)
        }
        PropertyType::ContextId => {
            let id = IdStreams::take_one(&mut streams.context_ids, "context id", offset)?;
            PropertyValue::ContextId(id)
        }
        PropertyType::ArrayOfContextIds => {
            let count = cursor.read_u32()? as usize;
            let ids = IdStreams::take(&mut streams.context_ids, count, "context ids", offset)?;
            PropertyValue::ContextIds(ids)
        }
        PropertyType::ArrayOfPropertyValues => {
            let count = cursor.read_u32()?;
            if count == 0 {
                PropertyValue::PropertyValues(None, Vec::new())
            } else {
                let element = PropertyId::read(cursor)?;
                if element.prop_type != PropertyType::PropertySet {
                    return Err(GraphError::framing(
                        offset,
                        format!("array of property values holds {:?}", element.prop_type),
                    ));
                }
                // Each nested set is at least two bytes.
                if count as usize > cursor.remaining() / 2 {
                    return Err(GraphError::framing(
                        offset,
                        format!("{count} property sets cannot fit"),
                    ));
                }
                let sets = (0..count)
                    .map(|_| PropertySet::read(cursor, streams, depth + 1))
                    .collect::<GraphResult<Vec<_>>>()?;
                PropertyValue::PropertyValues(Some(element), sets)
            }
        }
        PropertyType::PropertySet => {
            PropertyValue::PropertySet(PropertySet::read(cursor, streams, depth + 1)?)
        }
    })
}

fn write_value(writer: &mut ByteWriter, value: &PropertyValue) -> GraphResult<()> {
    match value {
        PropertyValue::NoData
        | PropertyValue::Bool(_)
        | PropertyValue::ObjectId(_)
        | PropertyValue::ObjectSpaceId(_)
        | PropertyValue::ContextId(_) => {}
        PropertyValue::U8(v) => writer.put_u8(*v),
        PropertyValue::U16(v) => writer.put_u16(*v),
        PropertyValue::U32(v) => writer.put_u32(*v),
        PropertyValue::U64(v) => writer.put_u64(*v),
        PropertyValue::Bytes(bytes) => {
            writer.put_u32(bytes.len() as u32);
            writer.put_bytes(bytes);
        }
        PropertyValue::ObjectIds(list)
        | PropertyValue::ObjectSpaceIds(list)
        | PropertyValue::ContextIds(list) => writer.put_u32(list.len() as u32),
        PropertyValue::PropertyValues(element, sets) => {
            writer.put_u32(sets.len() as u32);
            if !sets.is_empty() {
                let element =
                    element.unwrap_or_else(|| PropertyId::new(0, PropertyType::PropertySet));
                writer.put_u32(element.to_u32());
                for set in sets {
                    set.write(writer)?;
                }
            }
        }
        PropertyValue::PropertySet(set) => set.write(writer)?,
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Object space object property set
// ---------------------------------------------------------------------------

const COUNT_MASK: u32 = (1 << 24) - 1;
const EXTENDED_STREAMS_PRESENT: u32 = 1 << 30;
const OSID_STREAM_NOT_PRESENT: u32 = 1 << 31;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpaceObjectPropSet {
    pub oids: Vec<CompactId>,
    /// Absent when the object id stream says so.
    pub osids: Option<Vec<CompactId>>,
    /// Present only when the object space id stream declares it.
    pub context_ids: Option<Vec<CompactId>>,
    pub body: PropertySet,
    pub padding: Vec<u8>,
}

impl ObjectSpaceObjectPropSet {
    /// Wrap a property set, deriving the id streams from its values.
    pub fn from_property_set(body: PropertySet) -> Self {
        let mut ids = IdCollector::default();
        body.collect_ids(&mut ids);
        let context_ids = (!ids.context_ids.is_empty()).then_some(ids.context_ids);
        let osids = (!ids.osids.is_empty() || context_ids.is_some()).then_some(ids.osids);
        Self {
            oids: ids.oids,
            osids,
            context_ids,
            body,
            padding: Vec::new(),
        }
    }

    pub fn decode(bytes: &[u8]) -> GraphResult<Self> {
        Self::read(&mut ByteCursor::new(bytes))
    }

    /// Read a property set that extends to the end of `cursor`.
    pub fn read(cursor: &mut ByteCursor<'_>) -> GraphResult<Self> {
        let (oids, oid_flags) = read_id_stream(cursor)?;
        let (osids, osid_flags) = if oid_flags & OSID_STREAM_NOT_PRESENT == 0 {
            let (ids, flags) = read_id_stream(cursor)?;
            (Some(ids), flags)
        } else {
            (None, 0)
        };
        let context_ids = if osids.is_some() && osid_flags & EXTENDED_STREAMS_PRESENT != 0 {
            Some(read_id_stream(cursor)?.0)
        } else {
            None
        };

        let mut streams = IdStreams {
            oids: oids.iter(),
            osids: osids.as_deref().unwrap_or_default().iter(),
            context_ids: context_ids.as_deref().unwrap_or_default().iter(),
        };
        let body = PropertySet::read(cursor, &mut streams, 0)?;
        let padding = cursor.read_bytes(cursor.remaining())?.to_vec();
        Ok(Self {
            oids,
            osids,
            context_ids,
            body,
            padding,
        })
    }

    pub fn write(&self, writer: &mut ByteWriter) -> GraphResult<()> {
        let mut oid_flags = 0;
        if self.osids.is_none() {
            oid_flags |= OSID_STREAM_NOT_PRESENT;
        }
        write_id_stream(writer, &self.oids, oid_flags)?;
        if let Some(osids) = &self.osids {
            let flags = if self.context_ids.is_some() {
                EXTENDED_STREAMS_PRESENT
            } else {
                0
            };
            write_id_stream(writer, osids, flags)?;
            if let Some(context_ids) = &self.context_ids {
                write_id_stream(writer, context_ids, 0)?;
            }
        }
        self.body.write(writer)?;
        writer.put_bytes(&self.padding);
        Ok(())
    }

    pub fn encode(&self) -> GraphResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }
}

fn read_id_stream(cursor: &mut ByteCursor<'_>) -> GraphResult<(Vec<CompactId>, u32)> {
    let offset = cursor.offset();
    let header = cursor.read_u32()?;
    let count = (header & COUNT_MASK) as usize;
    if count > cursor.remaining() / CompactId::SIZE {
        return Err(GraphError::framing(offset, format!("id stream of {count} entries cannot fit")));
    }
    let ids = (0..count)
        .map(|_| CompactId::read(cursor))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((ids, header & !COUNT_MASK))
}

fn write_id_stream(writer: &mut ByteWriter, ids: &[CompactId], flags: u32) -> GraphResult<()> {
    if ids.len() > COUNT_MASK as usize {
        return Err(GraphError::framing(
            0,
            format!("id stream of {} entries is too long", ids.len()),
        ));
    }
    writer.put_u32(ids.len() as u32 | flags);
    for id in ids {
        id.write(writer);
    }
    Ok(())
}
