//! Object, revision, cell and group identifiers.
//!
//! Two encodings of [`ExtendedGuid`] exist: the fixed 20-byte form used inside
//! revision-store files and the compact variable-length form used by
//! cell-storage stream objects. [`CompactId`] is a 4-byte alias that resolves
//! to an `ExtendedGuid` through a per-file GUID table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compact::{read_compact_u64, write_compact_u64};
use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{TypeError, TypeResult};

/// A GUID paired with a 32-bit counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtendedGuid {
    pub guid: Uuid,
    pub n: u32,
}

impl ExtendedGuid {
    /// Size of the fixed encoding in bytes.
    pub const SIZE: usize = 20;

    pub const fn new(guid: Uuid, n: u32) -> Self {
        Self { guid, n }
    }

    /// The all-zero identifier. Represents "no object".
    pub const fn nil() -> Self {
        Self {
            guid: Uuid::nil(),
            n: 0,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.guid.is_nil() && self.n == 0
    }

    /// Decode the fixed 20-byte form.
    pub fn read(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        let guid = cursor.read_guid()?;
        let n = cursor.read_u32()?;
        Ok(Self { guid, n })
    }

    /// Encode the fixed 20-byte form.
    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_guid(&self.guid);
        writer.put_u32(self.n);
    }

    /// Decode the compact variable-length form.
    ///
    /// The low bits of the first byte select the width of `n`:
    /// `0x00` null, `xxxxx100` 5 bits, `xx100000` 10 bits, `x1000000`
    /// 17 bits, `0x80` followed by a full u32. Non-null forms are followed by
    /// the 16-byte GUID.
    pub fn read_compact(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        let offset = cursor.offset();
        let first = cursor.peek_u8()?;
        let n = if first == 0 {
            cursor.read_u8()?;
            return Ok(Self::nil());
        } else if first & 0x07 == 0x04 {
            (cursor.read_u8()? >> 3) as u32
        } else if first & 0x3F == 0x20 {
            (cursor.read_u16()? >> 6) as u32
        } else if first & 0x7F == 0x40 {
            (cursor.read_uint_le(3)? >> 7) as u32
        } else if first == 0x80 {
            cursor.read_u8()?;
            cursor.read_u32()?
        } else {
            return Err(TypeError::InvalidEncoding {
                offset,
                reason: format!("invalid compact extended GUID prefix {first:#04x}"),
            });
        };
        let guid = cursor.read_guid()?;
        Ok(Self { guid, n })
    }

    /// Encode the compact form, choosing the smallest width for `n`.
    pub fn write_compact(&self, writer: &mut ByteWriter) {
        if self.is_nil() {
            writer.put_u8(0);
            return;
        }
        let n = self.n;
        if n < 1 << 5 {
            writer.put_u8(((n << 3) | 0x04) as u8);
        } else if n < 1 << 10 {
            writer.put_u16(((n << 6) | 0x20) as u16);
        } else if n < 1 << 17 {
            let v = (n << 7) | 0x40;
            writer.put_bytes(&v.to_le_bytes()[..3]);
        } else {
            writer.put_u8(0x80);
            writer.put_u32(n);
        }
        writer.put_guid(&self.guid);
    }

    /// Decode a compact count followed by that many compact identifiers.
    pub fn read_compact_array(cursor: &mut ByteCursor<'_>) -> TypeResult<Vec<Self>> {
        let count = read_compact_u64(cursor)?;
        bounded_count(cursor, count, 1)?;
        (0..count).map(|_| Self::read_compact(cursor)).collect()
    }

    pub fn write_compact_array(ids: &[Self], writer: &mut ByteWriter) {
        write_compact_u64(writer, ids.len() as u64);
        for id in ids {
            id.write_compact(writer);
        }
    }
}

impl Default for ExtendedGuid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for ExtendedGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtendedGuid({self})")
    }
}

impl fmt::Display for ExtendedGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}},{}", self.guid, self.n)
    }
}

impl FromStr for ExtendedGuid {
    type Err = TypeError;

    /// Parse the `{guid},n` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (guid, n) = s
            .trim()
            .rsplit_once(',')
            .ok_or_else(|| TypeError::Parse(format!("missing counter in {s:?}")))?;
        let guid = guid.trim().trim_start_matches('{').trim_end_matches('}');
        let guid = Uuid::parse_str(guid).map_err(|e| TypeError::Parse(e.to_string()))?;
        let n = n
            .trim()
            .parse::<u32>()
            .map_err(|e| TypeError::Parse(e.to_string()))?;
        Ok(Self { guid, n })
    }
}

/// A 4-byte object identifier: an 8-bit counter and a 24-bit index into the
/// file's global identification table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompactId {
    pub n: u8,
    pub guid_index: u32,
}

impl CompactId {
    pub const SIZE: usize = 4;
    pub const MAX_GUID_INDEX: u32 = (1 << 24) - 1;

    /// Create a compact id. Fails if `guid_index` needs more than 24 bits.
    pub fn new(n: u8, guid_index: u32) -> TypeResult<Self> {
        if guid_index > Self::MAX_GUID_INDEX {
            return Err(TypeError::ValueOutOfRange {
                value: guid_index as u64,
                width: 24,
            });
        }
        Ok(Self { n, guid_index })
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            n: (raw & 0xFF) as u8,
            guid_index: raw >> 8,
        }
    }

    pub fn to_u32(&self) -> u32 {
        (self.guid_index << 8) | self.n as u32
    }

    pub fn read(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        Ok(Self::from_u32(cursor.read_u32()?))
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_u32(self.to_u32());
    }

    /// Expand into an [`ExtendedGuid`] given the GUID found at `guid_index`.
    pub fn resolve_with(&self, guid: Uuid) -> ExtendedGuid {
        ExtendedGuid::new(guid, self.n as u32)
    }
}

impl fmt::Debug for CompactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactId(n={}, index={})", self.n, self.guid_index)
    }
}

impl fmt::Display for CompactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guid_index, self.n)
    }
}

/// Identifies a cell: a pair of extended GUIDs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub ex1: ExtendedGuid,
    pub ex2: ExtendedGuid,
}

impl CellId {
    pub const fn new(ex1: ExtendedGuid, ex2: ExtendedGuid) -> Self {
        Self { ex1, ex2 }
    }

    pub fn read_compact(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        let ex1 = ExtendedGuid::read_compact(cursor)?;
        let ex2 = ExtendedGuid::read_compact(cursor)?;
        Ok(Self { ex1, ex2 })
    }

    pub fn write_compact(&self, writer: &mut ByteWriter) {
        self.ex1.write_compact(writer);
        self.ex2.write_compact(writer);
    }

    pub fn read_compact_array(cursor: &mut ByteCursor<'_>) -> TypeResult<Vec<Self>> {
        let count = read_compact_u64(cursor)?;
        bounded_count(cursor, count, 2)?;
        (0..count).map(|_| Self::read_compact(cursor)).collect()
    }

    pub fn write_compact_array(ids: &[Self], writer: &mut ByteWriter) {
        write_compact_u64(writer, ids.len() as u64);
        for id in ids {
            id.write_compact(writer);
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}; {}]", self.ex1, self.ex2)
    }
}

/// A GUID paired with a 64-bit version counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialNumber {
    pub guid: Uuid,
    pub value: u64,
}

impl SerialNumber {
    pub const fn new(guid: Uuid, value: u64) -> Self {
        Self { guid, value }
    }

    pub fn is_null(&self) -> bool {
        self.guid.is_nil() && self.value == 0
    }

    /// Decode: `0x00` for null, or `0x80` followed by GUID and u64.
    pub fn read_compact(cursor: &mut ByteCursor<'_>) -> TypeResult<Self> {
        let offset = cursor.offset();
        match cursor.read_u8()? {
            0x00 => Ok(Self::default()),
            0x80 => {
                let guid = cursor.read_guid()?;
                let value = cursor.read_u64()?;
                Ok(Self { guid, value })
            }
            other => Err(TypeError::InvalidEncoding {
                offset,
                reason: format!("invalid serial number prefix {other:#04x}"),
            }),
        }
    }

    pub fn write_compact(&self, writer: &mut ByteWriter) {
        if self.is_null() {
            writer.put_u8(0);
        } else {
            writer.put_u8(0x80);
            writer.put_guid(&self.guid);
            writer.put_u64(self.value);
        }
    }
}

/// Reject element counts that cannot possibly fit in the remaining bytes,
/// before allocating for them.
fn bounded_count(cursor: &ByteCursor<'_>, count: u64, min_item_size: u64) -> TypeResult<()> {
    let needed = count.saturating_mul(min_item_size);
    if needed > cursor.remaining() as u64 {
        return Err(TypeError::TruncatedInput {
            offset: cursor.offset(),
            needed,
            available: cursor.remaining() as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    fn compact_bytes(id: &ExtendedGuid) -> Vec<u8> {
        let mut w = ByteWriter::new();
        id.write_compact(&mut w);
        w.into_inner()
    }

    #[test]
    fn fixed_form_is_twenty_bytes() {
        let id = ExtendedGuid::new(guid("84defab9-aaa3-4a0d-a3a8-520c77ac7073"), 2);
        let mut w = ByteWriter::new();
        id.write(&mut w);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), ExtendedGuid::SIZE);
        assert_eq!(&bytes[16..], &2u32.to_le_bytes());
        assert_eq!(ExtendedGuid::read(&mut ByteCursor::new(&bytes)).unwrap(), id);
    }

    #[test]
    fn compact_nil_is_single_byte() {
        assert_eq!(compact_bytes(&ExtendedGuid::nil()), vec![0]);
    }

    #[test]
    fn compact_form_picks_smallest_width() {
        let g = guid("4a3717f8-1c14-49e7-9526-81d942de1741");
        assert_eq!(compact_bytes(&ExtendedGuid::new(g, 3)).len(), 17);
        assert_eq!(compact_bytes(&ExtendedGuid::new(g, 31)).len(), 17);
        assert_eq!(compact_bytes(&ExtendedGuid::new(g, 32)).len(), 18);
        assert_eq!(compact_bytes(&ExtendedGuid::new(g, 1 << 10)).len(), 19);
        assert_eq!(compact_bytes(&ExtendedGuid::new(g, 1 << 17)).len(), 21);
    }

    #[test]
    fn compact_invalid_prefix() {
        let data = [0x01u8; 20];
        let err = ExtendedGuid::read_compact(&mut ByteCursor::new(&data)).unwrap_err();
        assert!(matches!(err, TypeError::InvalidEncoding { offset: 0, .. }));
    }

    #[test]
    fn compact_array_rejects_absurd_count() {
        // Count of 100 with only two bytes behind it.
        let data = [0xC9u8, 0x00, 0x00];
        let err = ExtendedGuid::read_compact_array(&mut ByteCursor::new(&data)).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn compact_id_bit_layout() {
        let id = CompactId::from_u32(0x0012_3405);
        assert_eq!(id.n, 0x05);
        assert_eq!(id.guid_index, 0x1234);
        assert_eq!(id.to_u32(), 0x0012_3405);
    }

    #[test]
    fn compact_id_rejects_wide_index() {
        assert!(CompactId::new(0, 1 << 24).is_err());
        assert!(CompactId::new(0, CompactId::MAX_GUID_INDEX).is_ok());
    }

    #[test]
    fn serial_number_roundtrip() {
        let sn = SerialNumber::new(guid("1a5a319c-c26b-41aa-b9c5-9bd8c44e5d7f"), 42);
        let mut w = ByteWriter::new();
        sn.write_compact(&mut w);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 25);
        assert_eq!(SerialNumber::read_compact(&mut ByteCursor::new(&bytes)).unwrap(), sn);
    }

    #[test]
    fn display_format() {
        let id = ExtendedGuid::new(guid("1a5a319c-c26b-41aa-b9c5-9bd8c44e5d7f"), 1);
        assert_eq!(id.to_string(), "{1a5a319c-c26b-41aa-b9c5-9bd8c44e5d7f},1");
    }

    #[test]
    fn parse_display_form() {
        let id: ExtendedGuid = "{84defab9-aaa3-4a0d-a3a8-520c77ac7073},2".parse().unwrap();
        assert_eq!(id.n, 2);
        assert_eq!(id.to_string().parse::<ExtendedGuid>().unwrap(), id);
        assert!("84defab9-aaa3-4a0d-a3a8-520c77ac7073".parse::<ExtendedGuid>().is_err());
        assert!("{not-a-guid},1".parse::<ExtendedGuid>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let id = CellId::new(
            ExtendedGuid::new(Uuid::from_u128(7), 1),
            ExtendedGuid::new(Uuid::from_u128(9), 2),
        );
        let json = serde_json::to_string(&id).unwrap();
        let parsed: CellId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    proptest! {
        #[test]
        fn compact_extended_guid_roundtrip(g in any::<u128>(), n in any::<u32>()) {
            let id = ExtendedGuid::new(Uuid::from_u128(g), n);
            let bytes = compact_bytes(&id);
            let mut c = ByteCursor::new(&bytes);
            prop_assert_eq!(ExtendedGuid::read_compact(&mut c).unwrap(), id);
            prop_assert!(c.is_empty());
        }
    }
}
