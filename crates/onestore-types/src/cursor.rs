//! Little-endian byte cursor and writer.
//!
//! Every multi-byte integer in the revision-store format is little-endian.
//! [`ByteCursor`] tracks its own position and fails closed on overrun, so
//! decoders never compute slice bounds by hand.

use uuid::Uuid;

use crate::error::{TypeError, TypeResult};

/// Forward-only reader over a byte slice.
#[derive(Clone, Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a cursor whose error offsets are reported relative to `base`.
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute offset of the next byte, for error reporting.
    pub fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn ensure(&self, n: usize) -> TypeResult<()> {
        if n > self.remaining() {
            return Err(TypeError::TruncatedInput {
                offset: self.offset(),
                needed: n as u64,
                available: self.remaining() as u64,
            });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> TypeResult<&'a [u8]> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> TypeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn peek_u8(&self) -> TypeResult<u8> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    pub fn read_u8(&mut self) -> TypeResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> TypeResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> TypeResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> TypeResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a little-endian unsigned integer of `n` bytes (1..=8).
    pub fn read_uint_le(&mut self, n: usize) -> TypeResult<u64> {
        debug_assert!((1..=8).contains(&n));
        let bytes = self.read_bytes(n)?;
        let mut buf = [0u8; 8];
        buf[..n].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a GUID in its on-disk mixed-endian layout.
    pub fn read_guid(&mut self) -> TypeResult<Uuid> {
        Ok(Uuid::from_bytes_le(self.read_array()?))
    }

    /// Carve out the next `n` bytes as an independent cursor.
    ///
    /// The child reports offsets in the same absolute space as the parent.
    pub fn sub_cursor(&mut self, n: usize) -> TypeResult<ByteCursor<'a>> {
        let base = self.offset();
        let data = self.read_bytes(n)?;
        Ok(ByteCursor::with_base(data, base))
    }
}

/// Little-endian byte writer, the dual of [`ByteCursor`].
#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write the low `n` bytes of `v` little-endian.
    pub fn put_uint_le(&mut self, v: u64, n: usize) -> TypeResult<()> {
        if n < 8 && v >> (n * 8) != 0 {
            return Err(TypeError::ValueOutOfRange {
                value: v,
                width: (n * 8) as u32,
            });
        }
        self.buf.extend_from_slice(&v.to_le_bytes()[..n]);
        Ok(())
    }

    pub fn put_guid(&mut self, guid: &Uuid) {
        self.buf.extend_from_slice(&guid.to_bytes_le());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u8().unwrap(), 0x01);
        assert_eq!(c.read_u16().unwrap(), 0x0302);
        assert_eq!(c.read_u32().unwrap(), 0x0706_0504);
        assert!(c.is_empty());
    }

    #[test]
    fn truncated_read_reports_absolute_offset() {
        let data = [0u8; 6];
        let mut c = ByteCursor::with_base(&data, 1000);
        c.read_u32().unwrap();
        let err = c.read_u32().unwrap_err();
        assert_eq!(
            err,
            TypeError::TruncatedInput {
                offset: 1004,
                needed: 4,
                available: 2
            }
        );
        // Failed reads leave the position untouched.
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn sub_cursor_is_bounded() {
        let data = [1u8, 2, 3, 4, 5];
        let mut c = ByteCursor::with_base(&data, 10);
        c.read_u8().unwrap();
        let mut sub = c.sub_cursor(2).unwrap();
        assert_eq!(sub.offset(), 11);
        assert_eq!(sub.read_u16().unwrap(), 0x0302);
        assert!(sub.read_u8().unwrap_err().is_truncated());
        assert_eq!(c.read_u8().unwrap(), 4);
    }

    #[test]
    fn guid_layout_is_mixed_endian() {
        let guid = Uuid::parse_str("1a5a319c-c26b-41aa-b9c5-9bd8c44e5d7f").unwrap();
        let mut w = ByteWriter::new();
        w.put_guid(&guid);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[0x9c, 0x31, 0x5a, 0x1a]);
        let mut c = ByteCursor::new(&bytes);
        assert_eq!(c.read_guid().unwrap(), guid);
    }

    #[test]
    fn variable_width_uint() {
        let mut w = ByteWriter::new();
        w.put_uint_le(0x1234, 2).unwrap();
        w.put_uint_le(0xAB, 1).unwrap();
        assert!(w.put_uint_le(0x100, 1).is_err());
        let bytes = w.into_inner();
        let mut c = ByteCursor::new(&bytes);
        assert_eq!(c.read_uint_le(2).unwrap(), 0x1234);
        assert_eq!(c.read_uint_le(1).unwrap(), 0xAB);
    }
}
