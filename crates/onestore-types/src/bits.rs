//! Bit-granular reading and writing of packed header fields.
//!
//! Fields are packed least-significant-bit first: the first field read from a
//! buffer occupies the low bits of the first byte, and a field that straddles
//! a byte boundary continues in the low bits of the next byte. Multi-byte
//! words are therefore read as little-endian integers, which is how every
//! packed structure in the revision-store format is laid out.

use crate::error::{TypeError, TypeResult};

/// Reads unsigned fields of arbitrary width (1..=64 bits) from a byte slice.
///
/// The bit position only moves forward and never passes `len * 8`. A read
/// that would cross the end fails without advancing.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
    base: u64,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a reader whose errors report offsets relative to `base`.
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self {
            data,
            bit_pos: 0,
            base,
        }
    }

    /// Read the next `width` bits as an unsigned integer.
    pub fn read_uint(&mut self, width: u32) -> TypeResult<u64> {
        if width > 64 {
            return Err(TypeError::InvalidEncoding {
                offset: self.byte_offset(),
                reason: format!("bit field width {width} exceeds 64"),
            });
        }
        let width = width as usize;
        if width > self.remaining_bits() {
            return Err(TypeError::TruncatedInput {
                offset: self.byte_offset(),
                needed: width.div_ceil(8) as u64,
                available: (self.remaining_bits() / 8) as u64,
            });
        }

        let mut value = 0u64;
        let mut written = 0usize;
        while written < width {
            let byte = self.data[self.bit_pos / 8];
            let bit_off = self.bit_pos % 8;
            let take = (8 - bit_off).min(width - written);
            let mask = ((1u16 << take) - 1) as u8;
            let bits = (byte >> bit_off) & mask;
            value |= (bits as u64) << written;
            written += take;
            self.bit_pos += take;
        }
        Ok(value)
    }

    /// Read a single-bit flag.
    pub fn read_bool(&mut self) -> TypeResult<bool> {
        Ok(self.read_uint(1)? == 1)
    }

    /// Bits left before the end of the buffer.
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Bits consumed so far.
    pub fn position_bits(&self) -> usize {
        self.bit_pos
    }

    /// Whole bytes consumed so far (a partially read byte counts as consumed).
    pub fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    fn byte_offset(&self) -> u64 {
        self.base + (self.bit_pos / 8) as u64
    }
}

/// Packs unsigned fields of arbitrary width into a byte buffer.
///
/// The dual of [`BitReader`]: appending fields in the order they are read
/// reproduces the original bytes.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` using exactly `width` bits.
    pub fn append_uint(&mut self, value: u64, width: u32) -> TypeResult<()> {
        if width > 64 || (width < 64 && value >> width != 0) {
            return Err(TypeError::ValueOutOfRange { value, width });
        }
        let width = width as usize;
        let mut written = 0usize;
        while written < width {
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            let bit_off = self.bit_len % 8;
            let take = (8 - bit_off).min(width - written);
            let mask = (1u64 << take) - 1;
            let bits = ((value >> written) & mask) as u8;
            let last = self.bytes.len() - 1;
            self.bytes[last] |= bits << bit_off;
            written += take;
            self.bit_len += take;
        }
        Ok(())
    }

    /// Append a single-bit flag.
    pub fn append_bool(&mut self, flag: bool) -> TypeResult<()> {
        self.append_uint(flag as u64, 1)
    }

    /// Number of bits written.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Finish writing. A partial final byte is zero-padded.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
