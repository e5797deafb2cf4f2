//! Variable-length unsigned integers used by cell-storage stream objects.
//!
//! The number of trailing zero bits in the first byte selects the width:
//!
//! ```text
//! 0x00           zero, 1 byte
//! xxxxxxx1       7-bit value, 1 byte
//! xxxxxx10       14-bit value, 2 bytes
//! xxxxx100       21-bit value, 3 bytes
//! xxxx1000       28-bit value, 4 bytes
//! xxx10000       35-bit value, 5 bytes
//! xx100000       42-bit value, 6 bytes
//! x1000000       49-bit value, 7 bytes
//! 10000000       64-bit value in the following 8 bytes, 9 bytes
//! ```

use crate::cursor::{ByteCursor, ByteWriter};
use crate::error::{TypeError, TypeResult};

/// Decode a compact unsigned 64-bit integer.
pub fn read_compact_u64(cursor: &mut ByteCursor<'_>) -> TypeResult<u64> {
    let offset = cursor.offset();
    let first = cursor.peek_u8()?;
    if first == 0 {
        cursor.read_u8()?;
        return Ok(0);
    }
    if first == 0x80 {
        cursor.read_u8()?;
        return cursor.read_u64();
    }
    let tag_bits = first.trailing_zeros() + 1;
    if tag_bits > 7 {
        return Err(TypeError::InvalidEncoding {
            offset,
            reason: format!("invalid compact integer prefix {first:#04x}"),
        });
    }
    let raw = cursor.read_uint_le(tag_bits as usize)?;
    Ok(raw >> tag_bits)
}

/// Encode a compact unsigned 64-bit integer using the smallest form.
pub fn write_compact_u64(writer: &mut ByteWriter, value: u64) {
    if value == 0 {
        writer.put_u8(0);
        return;
    }
    for width in 1u32..=7 {
        if value < 1u64 << (7 * width) {
            let encoded = (value << width) | (1u64 << (width - 1));
            let bytes = encoded.to_le_bytes();
            writer.put_bytes(&bytes[..width as usize]);
            return;
        }
    }
    writer.put_u8(0x80);
    writer.put_u64(value);
}

/// Encoded length of `value` in bytes.
pub fn compact_u64_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    (1u32..=7)
        .find(|w| value < 1u64 << (7 * w))
        .map(|w| w as usize)
        .unwrap_or(9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(value: u64) -> Vec<u8> {
        let mut w = ByteWriter::new();
        write_compact_u64(&mut w, value);
        w.into_inner()
    }

    #[test]
    fn zero_is_one_byte() {
        assert_eq!(encode(0), vec![0x00]);
    }

    #[test]
    fn seven_bit_form() {
        assert_eq!(encode(1), vec![0x03]);
        assert_eq!(encode(127), vec![0xFF]);
    }

    #[test]
    fn fourteen_bit_form() {
        assert_eq!(encode(128), vec![0x02, 0x02]);
    }

    #[test]
    fn sixty_four_bit_form() {
        let bytes = encode(u64::MAX);
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0x80);
    }

    #[test]
    fn seven_bit_zero_decodes() {
        let data = [0x01];
        let mut c = ByteCursor::new(&data);
        assert_eq!(read_compact_u64(&mut c).unwrap(), 0);
    }

    #[test]
    fn truncated_multi_byte_form() {
        let data = [0x04, 0x00];
        let mut c = ByteCursor::new(&data);
        assert!(read_compact_u64(&mut c).unwrap_err().is_truncated());
    }

    proptest! {
        #[test]
        fn roundtrip(value in any::<u64>()) {
            let bytes = encode(value);
            prop_assert_eq!(bytes.len(), compact_u64_len(value));
            let mut c = ByteCursor::new(&bytes);
            prop_assert_eq!(read_compact_u64(&mut c).unwrap(), value);
            prop_assert!(c.is_empty());
        }
    }
}
