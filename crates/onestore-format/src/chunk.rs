//! Chunk references: `(location, length)` pairs addressing bytes in the file.
//!
//! Three encodings exist. File headers use fixed 32-bit and 64x32-bit forms;
//! file nodes use a packed form whose field widths are selected by the 2-bit
//! `stpFormat`/`cbFormat` codes in the node header. Compressed widths store
//! the value divided by 8.

use serde::{Deserialize, Serialize};

use onestore_types::{ByteCursor, ByteWriter, TypeError};

use crate::error::{FormatError, FormatResult};

/// Encoding of the location field of a packed chunk reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StpFormat {
    /// 8 bytes, uncompressed.
    U64,
    /// 4 bytes, uncompressed.
    U32,
    /// 2 bytes, value × 8.
    CompressedU16,
    /// 4 bytes, value × 8.
    CompressedU32,
}

impl StpFormat {
    /// Decode the 2-bit format code.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::U64,
            1 => Self::U32,
            2 => Self::CompressedU16,
            _ => Self::CompressedU32,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::U64 => 0,
            Self::U32 => 1,
            Self::CompressedU16 => 2,
            Self::CompressedU32 => 3,
        }
    }

    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::U64 => 8,
            Self::U32 | Self::CompressedU32 => 4,
            Self::CompressedU16 => 2,
        }
    }

    pub fn scale(self) -> u64 {
        match self {
            Self::U64 | Self::U32 => 1,
            Self::CompressedU16 | Self::CompressedU32 => 8,
        }
    }
}

/// Encoding of the length field of a packed chunk reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CbFormat {
    /// 4 bytes, uncompressed.
    U32,
    /// 8 bytes, uncompressed.
    U64,
    /// 1 byte, value × 8.
    CompressedU8,
    /// 2 bytes, value × 8.
    CompressedU16,
}

impl CbFormat {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::U32,
            1 => Self::U64,
            2 => Self::CompressedU8,
            _ => Self::CompressedU16,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::U32 => 0,
            Self::U64 => 1,
            Self::CompressedU8 => 2,
            Self::CompressedU16 => 3,
        }
    }

    pub fn width(self) -> usize {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
            Self::CompressedU8 => 1,
            Self::CompressedU16 => 2,
        }
    }

    pub fn scale(self) -> u64 {
        match self {
            Self::U32 | Self::U64 => 1,
            Self::CompressedU8 | Self::CompressedU16 => 8,
        }
    }
}

fn max_for_width(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

/// A reference to a byte range in the backing store.
///
/// `stp` and `cb` hold the raw field values as encoded; use [`location`] and
/// [`length`] for the byte position and size.
///
/// A reference is *nil* when every bit of its location field is set and its
/// length is zero, and *zero* when both fields are zero. The two never
/// coincide.
///
/// [`location`]: ChunkReference::location
/// [`length`]: ChunkReference::length
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkReference {
    Fixed32 {
        stp: u32,
        cb: u32,
    },
    Fixed64x32 {
        stp: u64,
        cb: u32,
    },
    Packed {
        stp: u64,
        cb: u64,
        stp_format: StpFormat,
        cb_format: CbFormat,
    },
}

impl ChunkReference {
    pub const FIXED32_SIZE: usize = 8;
    pub const FIXED64X32_SIZE: usize = 12;

    pub const fn nil_fixed32() -> Self {
        Self::Fixed32 {
            stp: u32::MAX,
            cb: 0,
        }
    }

    pub const fn nil_fixed64x32() -> Self {
        Self::Fixed64x32 {
            stp: u64::MAX,
            cb: 0,
        }
    }

    /// The nil packed reference for the given formats.
    pub fn nil_packed(stp_format: StpFormat, cb_format: CbFormat) -> Self {
        Self::Packed {
            stp: max_for_width(stp_format.width()),
            cb: 0,
            stp_format,
            cb_format,
        }
    }

    /// Build a packed reference from a byte location and length.
    ///
    /// Fails if either value does not fit its format, or if a compressed
    /// format is asked to hold a value that is not a multiple of 8.
    pub fn packed(
        location: u64,
        length: u64,
        stp_format: StpFormat,
        cb_format: CbFormat,
    ) -> FormatResult<Self> {
        let stp = scale_down(location, stp_format.scale(), stp_format.width())?;
        let cb = scale_down(length, cb_format.scale(), cb_format.width())?;
        Ok(Self::Packed {
            stp,
            cb,
            stp_format,
            cb_format,
        })
    }

    /// Decode a packed reference from the start of `bytes`.
    ///
    /// Returns the reference and the number of bytes consumed.
    pub fn decode(
        bytes: &[u8],
        stp_format: StpFormat,
        cb_format: CbFormat,
    ) -> FormatResult<(Self, usize)> {
        let mut cursor = ByteCursor::new(bytes);
        let reference = Self::read_packed(&mut cursor, stp_format, cb_format)?;
        Ok((reference, cursor.position()))
    }

    pub fn read_packed(
        cursor: &mut ByteCursor<'_>,
        stp_format: StpFormat,
        cb_format: CbFormat,
    ) -> FormatResult<Self> {
        let stp = cursor.read_uint_le(stp_format.width())?;
        let cb = cursor.read_uint_le(cb_format.width())?;
        Ok(Self::Packed {
            stp,
            cb,
            stp_format,
            cb_format,
        })
    }

    pub fn read_fixed32(cursor: &mut ByteCursor<'_>) -> FormatResult<Self> {
        let stp = cursor.read_u32()?;
        let cb = cursor.read_u32()?;
        Ok(Self::Fixed32 { stp, cb })
    }

    pub fn read_fixed64x32(cursor: &mut ByteCursor<'_>) -> FormatResult<Self> {
        let stp = cursor.read_u64()?;
        let cb = cursor.read_u32()?;
        Ok(Self::Fixed64x32 { stp, cb })
    }

    /// Encode in the reference's own encoding.
    pub fn write(&self, writer: &mut ByteWriter) -> FormatResult<()> {
        match *self {
            Self::Fixed32 { stp, cb } => {
                writer.put_u32(stp);
                writer.put_u32(cb);
            }
            Self::Fixed64x32 { stp, cb } => {
                writer.put_u64(stp);
                writer.put_u32(cb);
            }
            Self::Packed {
                stp,
                cb,
                stp_format,
                cb_format,
            } => {
                writer.put_uint_le(stp, stp_format.width())?;
                writer.put_uint_le(cb, cb_format.width())?;
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> FormatResult<Vec<u8>> {
        let mut writer = ByteWriter::new();
        self.write(&mut writer)?;
        Ok(writer.into_inner())
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Fixed32 { .. } => Self::FIXED32_SIZE,
            Self::Fixed64x32 { .. } => Self::FIXED64X32_SIZE,
            Self::Packed {
                stp_format,
                cb_format,
                ..
            } => stp_format.width() + cb_format.width(),
        }
    }

    /// Byte offset of the referenced range.
    pub fn location(&self) -> u64 {
        match *self {
            Self::Fixed32 { stp, .. } => stp as u64,
            Self::Fixed64x32 { stp, .. } => stp,
            Self::Packed {
                stp, stp_format, ..
            } => stp.saturating_mul(stp_format.scale()),
        }
    }

    /// Size in bytes of the referenced range.
    pub fn length(&self) -> u64 {
        match *self {
            Self::Fixed32 { cb, .. } | Self::Fixed64x32 { cb, .. } => cb as u64,
            Self::Packed { cb, cb_format, .. } => cb.saturating_mul(cb_format.scale()),
        }
    }

    pub fn is_nil(&self) -> bool {
        match *self {
            Self::Fixed32 { stp, cb } => stp == u32::MAX && cb == 0,
            Self::Fixed64x32 { stp, cb } => stp == u64::MAX && cb == 0,
            Self::Packed {
                stp,
                cb,
                stp_format,
                ..
            } => stp == max_for_width(stp_format.width()) && cb == 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Self::Fixed32 { stp, cb } => stp == 0 && cb == 0,
            Self::Fixed64x32 { stp, cb } => stp == 0 && cb == 0,
            Self::Packed { stp, cb, .. } => stp == 0 && cb == 0,
        }
    }

    /// The format codes of a packed reference.
    pub fn formats(&self) -> Option<(StpFormat, CbFormat)> {
        match *self {
            Self::Packed {
                stp_format,
                cb_format,
                ..
            } => Some((stp_format, cb_format)),
            _ => None,
        }
    }
}

fn scale_down(value: u64, scale: u64, width: usize) -> FormatResult<u64> {
    if value % scale != 0 {
        return Err(FormatError::Type(TypeError::InvalidEncoding {
            offset: 0,
            reason: format!("value {value} is not a multiple of {scale}"),
        }));
    }
    let raw = value / scale;
    if raw > max_for_width(width) {
        return Err(FormatError::Type(TypeError::ValueOutOfRange {
            value,
            width: (width * 8) as u32,
        }));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STP_FORMATS: [StpFormat; 4] = [
        StpFormat::U64,
        StpFormat::U32,
        StpFormat::CompressedU16,
        StpFormat::CompressedU32,
    ];
    const CB_FORMATS: [CbFormat; 4] = [
        CbFormat::U32,
        CbFormat::U64,
        CbFormat::CompressedU8,
        CbFormat::CompressedU16,
    ];

    #[test]
    fn format_codes_roundtrip() {
        for f in STP_FORMATS {
            assert_eq!(StpFormat::from_bits(f.bits()), f);
        }
        for f in CB_FORMATS {
            assert_eq!(CbFormat::from_bits(f.bits()), f);
        }
    }

    #[test]
    fn compressed_values_are_scaled() {
        let bytes = [0x10, 0x00, 0x04];
        let (r, consumed) =
            ChunkReference::decode(&bytes, StpFormat::CompressedU16, CbFormat::CompressedU8)
                .unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(r.location(), 0x80);
        assert_eq!(r.length(), 32);
    }

    #[test]
    fn nil_and_zero_for_every_format() {
        for s in STP_FORMATS {
            for c in CB_FORMATS {
                let nil = ChunkReference::nil_packed(s, c);
                assert!(nil.is_nil());
                assert!(!nil.is_zero());
                let zero = ChunkReference::packed(0, 0, s, c).unwrap();
                assert!(zero.is_zero());
                assert!(!zero.is_nil());
            }
        }
        assert!(ChunkReference::nil_fixed32().is_nil());
        assert!(ChunkReference::nil_fixed64x32().is_nil());
        assert!(ChunkReference::Fixed64x32 { stp: 0, cb: 0 }.is_zero());
    }

    #[test]
    fn nil_requires_zero_length() {
        let r = ChunkReference::Fixed64x32 {
            stp: u64::MAX,
            cb: 1,
        };
        assert!(!r.is_nil());
    }

    #[test]
    fn packed_rejects_unaligned_compressed_value() {
        let err = ChunkReference::packed(12, 8, StpFormat::CompressedU16, CbFormat::U32);
        assert!(err.is_err());
    }

    #[test]
    fn packed_rejects_overflowing_value() {
        let err = ChunkReference::packed(1 << 20, 8, StpFormat::CompressedU16, CbFormat::U32);
        assert!(err.is_err());
    }

    #[test]
    fn truncated_packed_reference() {
        let err = ChunkReference::decode(&[0u8; 5], StpFormat::U64, CbFormat::U32).unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn fixed_encodings_have_fixed_sizes() {
        let r = ChunkReference::Fixed64x32 { stp: 0x1234, cb: 99 };
        let bytes = r.encode().unwrap();
        assert_eq!(bytes.len(), ChunkReference::FIXED64X32_SIZE);
        let back = ChunkReference::read_fixed64x32(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(back, r);

        let r = ChunkReference::Fixed32 { stp: 7, cb: 8 };
        let bytes = r.encode().unwrap();
        assert_eq!(bytes.len(), ChunkReference::FIXED32_SIZE);
        let back = ChunkReference::read_fixed32(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(back, r);
    }

    fn stp_format() -> impl Strategy<Value = StpFormat> {
        (0u8..4).prop_map(StpFormat::from_bits)
    }

    fn cb_format() -> impl Strategy<Value = CbFormat> {
        (0u8..4).prop_map(CbFormat::from_bits)
    }

    proptest! {
        #[test]
        fn packed_bytes_roundtrip(
            s in stp_format(),
            c in cb_format(),
            raw in prop::collection::vec(any::<u8>(), 16),
        ) {
            let (r, consumed) = ChunkReference::decode(&raw, s, c).unwrap();
            prop_assert_eq!(consumed, s.width() + c.width());
            prop_assert_eq!(r.encode().unwrap(), raw[..consumed].to_vec());
        }

        #[test]
        fn packed_value_roundtrip(
            s in stp_format(),
            c in cb_format(),
            stp in any::<u64>(),
            cb in any::<u64>(),
        ) {
            let stp = stp & max_for_width(s.width());
            let cb = cb & max_for_width(c.width());
            let r = ChunkReference::Packed { stp, cb, stp_format: s, cb_format: c };
            let bytes = r.encode().unwrap();
            let (back, _) = ChunkReference::decode(&bytes, s, c).unwrap();
            prop_assert_eq!(back, r);
            prop_assert!(!(back.is_nil() && back.is_zero()));
        }

        #[test]
        fn fixed64x32_roundtrip(stp in any::<u64>(), cb in any::<u32>()) {
            let r = ChunkReference::Fixed64x32 { stp, cb };
            let bytes = r.encode().unwrap();
            let back = ChunkReference::read_fixed64x32(&mut ByteCursor::new(&bytes)).unwrap();
            prop_assert_eq!(back, r);
        }
    }
}
