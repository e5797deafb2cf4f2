//! Foundation types for the revision-store codec.
//!
//! Every other onestore crate depends on `onestore-types`. It provides the
//! cursors that all decoders are written against and the identifier types
//! used as cross-reference keys throughout the object graph.
//!
//! # Key Types
//!
//! - [`BitReader`] / [`BitWriter`] - arbitrary-width packed fields, LSB first
//! - [`ByteCursor`] / [`ByteWriter`] - little-endian integers, fail closed on overrun
//! - [`ExtendedGuid`] - GUID + counter; fixed 20-byte and compact encodings
//! - [`CompactId`] - 4-byte alias resolved through a GUID table
//! - [`CellId`], [`SerialNumber`] - cell-storage identifiers
//! - [`Jcid`] - object class descriptor

pub mod bits;
pub mod compact;
pub mod cursor;
pub mod error;
pub mod identity;
pub mod jcid;

pub use bits::{BitReader, BitWriter};
pub use compact::{compact_u64_len, read_compact_u64, write_compact_u64};
pub use cursor::{ByteCursor, ByteWriter};
pub use error::{TypeError, TypeResult};
pub use identity::{CellId, CompactId, ExtendedGuid, SerialNumber};
pub use jcid::Jcid;
pub use uuid::Uuid;
