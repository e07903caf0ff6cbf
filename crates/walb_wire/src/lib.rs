//! On-disk wire format for WalB: superblock, logpack header and
//! records, and the checksum/codec helpers they share.
//!
//! Integers here are stored in native byte order by design (spec.md
//! §1, Non-goals): this is the single place that packs and unpacks
//! them, so an endian-portable variant would only touch this crate.

pub mod checksum;
mod error;
pub mod logpack;
pub mod lsid;
pub mod pbs;
pub mod superblock;

pub use error::WireError;
pub use logpack::{LogRecord, LogpackHeader, RecordFlags, SECTOR_TYPE_LOGPACK};
pub use lsid::Lsid;
pub use pbs::Pbs;
pub use superblock::{SUPER_BLOCK_MAGIC, SUPER_BLOCK_OFFSET_BYTES, SuperBlock};
