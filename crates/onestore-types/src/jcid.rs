use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::TypeResult;

const IS_BINARY: u32 = 1 << 16;
const IS_PROPERTY_SET: u32 = 1 << 17;
const IS_GRAPH_NODE: u32 = 1 << 18;
const IS_FILE_DATA: u32 = 1 << 19;
const IS_READ_ONLY: u32 = 1 << 20;

/// Class descriptor attached to an object.
///
/// Layout (LSB first): `index[16] IsBinary IsPropertySet IsGraphNode
/// IsFileData IsReadOnly reserved[11]`. The flags tell a reader how to
/// interpret the object's payload; `IsFileData` objects carry opaque file
/// bytes rather than a property set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Jcid(u32);

impl Jcid {
    pub const SIZE: usize = 4;

    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// Build a descriptor from a class index and flag bits.
    pub fn new(index: u16, is_property_set: bool, is_file_data: bool) -> Self {
        let mut raw = index as u32;
        if is_property_set {
            raw |= IS_PROPERTY_SET;
        }
        if is_file_data {
            raw |= IS_FILE_DATA;
        }
        Self(raw)
    }

    pub fn index(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn is_binary(self) -> bool {
        self.0 & IS_BINARY != 0
    }

    pub fn is_property_set(self) -> bool {
        self.0 & IS_PROPERTY_SET != 0
    }

    pub fn is_graph_node(self) -> bool {
        self.0 & IS_GRAPH_NODE != 0
    }

    pub fn is_file_data(self) -> bool {
        self.0 & IS_FILE_DATA != 0
    }

    pub fn is_read_only(self) -> bool {
        self.0 & IS_READ_ONLY != 0
    }

    /// Reserved bits 21..32.
    pub fn reserved(self) -> u32 {
        self.0 >> 21
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        Ok(Self(cursor.read_u32()?))
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_u32(self.0);
    }
}

impl fmt::Debug for Jcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jcid")
            .field("index", &format_args!("{:#06x}", self.index()))
            .field("property_set", &self.is_property_set())
            .field("file_data", &self.is_file_data())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits() {
        let jcid = Jcid::from_u32(0x0006_0008);
        assert_eq!(jcid.index(), 0x0008);
        assert!(jcid.is_property_set());
        assert!(jcid.is_graph_node());
        assert!(!jcid.is_file_data());
        assert!(!jcid.is_binary());
    }

    #[test]
    fn file_data_descriptor() {
        let jcid = Jcid::new(0x0001, false, true);
        assert!(jcid.is_file_data());
        assert!(!jcid.is_property_set());
        assert_eq!(jcid.to_u32(), 0x0008_0001);
    }

    #[test]
    fn read_write() {
        let jcid = Jcid::from_u32(0x0012_0035);
        assert!(jcid.is_read_only());
        let mut w = ByteWriter::new();
        jcid.write(&mut w);
        let bytes = w.into_inner();
        assert_eq!(Jcid::read(&mut ByteCursor::new(&bytes)).unwrap(), jcid);
        assert!(jcid.is_property_set());
        assert_eq!(jcid.reserved(), 0);
    }
}
