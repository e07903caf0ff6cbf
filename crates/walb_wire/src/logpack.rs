//! Logpack header and record wire format.
//!
//! One logpack is a PBS-sized header block immediately followed by
//! `total_io_size` physical blocks of payload (padding records
//! contribute to `total_io_size` but never to an observable record).

use bitflags::bitflags;
use dataview::{Pod, PodMethods as _};

use crate::{checksum, error::WireError, lsid::Lsid, pbs::Pbs};

/// Magic value stored in a logpack header's `sector_type` field.
pub const SECTOR_TYPE_LOGPACK: u32 = 0x0000_6c67; // "gl\0\0" little-endian-ish tag

bitflags! {
    /// Per-record flags (spec.md §3, logpack header record).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct RecordFlags: u32 {
        /// The record refers to real payload blocks following the header.
        const EXIST = 1 << 0;
        /// The record is a padding record inserted to align a write to a
        /// physical block boundary; it has payload space but no data.
        const PADDING = 1 << 1;
        /// The record represents a DISCARD; it has no LDEV payload.
        const DISCARD = 1 << 2;
    }
}

/// One logpack header record (spec.md §3).
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct LogRecord {
    offset_lb: u64,
    io_size_lb: u32,
    lsid_local: u32,
    checksum: u32,
    flags: u32,
}

impl LogRecord {
    #[must_use]
    pub fn new(offset_lb: u64, io_size_lb: u32, lsid_local: u32, flags: RecordFlags) -> Self {
        Self {
            offset_lb,
            io_size_lb,
            lsid_local,
            checksum: 0,
            flags: flags.bits(),
        }
    }

    #[must_use]
    pub const fn offset_lb(&self) -> u64 {
        self.offset_lb
    }

    #[must_use]
    pub const fn io_size_lb(&self) -> u32 {
        self.io_size_lb
    }

    #[must_use]
    pub const fn lsid_local(&self) -> u32 {
        self.lsid_local
    }

    #[must_use]
    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_truncate(self.flags)
    }

    #[must_use]
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    /// `lsid = logpack_lsid + lsid_local`.
    #[must_use]
    pub fn lsid(&self, logpack_lsid: Lsid) -> Lsid {
        logpack_lsid.add_pb(self.lsid_local)
    }

    #[must_use]
    pub fn range_overlaps(&self, other_offset_lb: u64, other_len_lb: u32) -> bool {
        let a_end = self.offset_lb + u64::from(self.io_size_lb);
        let b_end = other_offset_lb + u64::from(other_len_lb);
        self.offset_lb < b_end && other_offset_lb < a_end
    }
}

/// In-memory representation of a logpack header (spec.md §3).
///
/// Encoded to / decoded from exactly one PBS-sized block via
/// [`LogpackHeader::encode`] / [`LogpackHeader::decode`].
#[derive(Debug, Clone)]
pub struct LogpackHeader {
    pub logpack_lsid: Lsid,
    pub records: Vec<LogRecord>,
    pub n_padding: u32,
    pub total_io_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod)]
struct RawPrefix {
    sector_type: u32,
    // Explicit: `logpack_lsid` needs 8-byte alignment, and `Pod` rejects
    // implicit compiler-inserted padding.
    _reserved: u32,
    logpack_lsid: u64,
    n_records: u32,
    n_padding: u32,
    total_io_size: u32,
    checksum: u32,
}

const PREFIX_SIZE: usize = core::mem::size_of::<RawPrefix>();
const RECORD_SIZE: usize = core::mem::size_of::<LogRecord>();

impl LogpackHeader {
    #[must_use]
    pub fn new(logpack_lsid: Lsid) -> Self {
        Self {
            logpack_lsid,
            records: Vec::new(),
            n_padding: 0,
            total_io_size: 0,
        }
    }

    /// Maximum number of records a header of the given physical block
    /// size can hold (spec.md §4.1, trigger 4).
    #[must_use]
    pub const fn capacity(pbs: Pbs) -> usize {
        (pbs.as_usize() - PREFIX_SIZE) / RECORD_SIZE
    }

    #[must_use]
    pub fn is_zero_flush_only(&self) -> bool {
        self.records.is_empty()
    }

    /// Encodes this header into a freshly allocated PBS-sized buffer,
    /// computing the checksum over the whole block with `salt`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TooManyRecords`] if the header holds more
    /// records than `pbs` can represent.
    pub fn encode(&self, pbs: Pbs, salt: u32) -> Result<Vec<u8>, WireError> {
        let cap = Self::capacity(pbs);
        if self.records.len() > cap {
            return Err(WireError::TooManyRecords {
                got: self.records.len(),
                capacity: cap,
            });
        }

        let mut buf = vec![0u8; pbs.as_usize()];
        let prefix = RawPrefix {
            sector_type: SECTOR_TYPE_LOGPACK,
            _reserved: 0,
            logpack_lsid: self.logpack_lsid.value(),
            n_records: u32::try_from(self.records.len()).unwrap(),
            n_padding: self.n_padding,
            total_io_size: self.total_io_size,
            checksum: 0,
        };
        buf[..PREFIX_SIZE].copy_from_slice(prefix.as_bytes());
        for (i, rec) in self.records.iter().enumerate() {
            let start = PREFIX_SIZE + i * RECORD_SIZE;
            buf[start..start + RECORD_SIZE].copy_from_slice(rec.as_bytes());
        }

        let sum = checksum::checksum(&buf, salt);
        buf[PREFIX_SIZE - 4..PREFIX_SIZE].copy_from_slice(&sum.to_ne_bytes());
        Ok(buf)
    }

    /// Decodes a header from a PBS-sized block, verifying the checksum
    /// against `salt`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::BadSectorType`], [`WireError::ChecksumMismatch`],
    /// or [`WireError::TooManyRecords`] as appropriate. Replay and
    /// recovery code must stop at the first such error (spec.md §7).
    pub fn decode(buf: &[u8], pbs: Pbs, salt: u32) -> Result<Self, WireError> {
        if buf.len() != pbs.as_usize() {
            return Err(WireError::ShortBuffer {
                got: buf.len(),
                want: pbs.as_usize(),
            });
        }

        let prefix = *buf[..PREFIX_SIZE].as_data_view().get::<RawPrefix>(0);
        if prefix.sector_type != SECTOR_TYPE_LOGPACK {
            return Err(WireError::BadSectorType(prefix.sector_type));
        }

        let cap = Self::capacity(pbs);
        let n_records = prefix.n_records as usize;
        if n_records > cap {
            return Err(WireError::TooManyRecords {
                got: n_records,
                capacity: cap,
            });
        }

        let mut verify_buf = buf.to_vec();
        verify_buf[PREFIX_SIZE - 4..PREFIX_SIZE].copy_from_slice(&0u32.to_ne_bytes());
        if !checksum::verify(&verify_buf, salt, prefix.checksum) {
            return Err(WireError::ChecksumMismatch);
        }

        let mut records = Vec::with_capacity(n_records);
        for i in 0..n_records {
            let start = PREFIX_SIZE + i * RECORD_SIZE;
            let rec = *buf[start..start + RECORD_SIZE].as_data_view().get::<LogRecord>(0);
            records.push(rec);
        }

        Ok(Self {
            logpack_lsid: Lsid::new(prefix.logpack_lsid),
            records,
            n_padding: prefix.n_padding,
            total_io_size: prefix.total_io_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_shrinks_with_smaller_pbs() {
        let pbs512 = Pbs::new(512).unwrap();
        let pbs4096 = Pbs::new(4096).unwrap();
        assert!(LogpackHeader::capacity(pbs512) < LogpackHeader::capacity(pbs4096));
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let pbs = Pbs::new(4096).unwrap();
        let mut header = LogpackHeader::new(Lsid::new(100));
        header
            .records
            .push(LogRecord::new(0, 8, 0, RecordFlags::EXIST));
        header
            .records
            .push(LogRecord::new(8, 8, 1, RecordFlags::EXIST));
        header.total_io_size = 16;

        let encoded = header.encode(pbs, 0xDEAD_BEEF).unwrap();
        let decoded = LogpackHeader::decode(&encoded, pbs, 0xDEAD_BEEF).unwrap();

        assert_eq!(decoded.logpack_lsid, header.logpack_lsid);
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].offset_lb(), 0);
        assert_eq!(decoded.records[1].offset_lb(), 8);
        assert_eq!(decoded.total_io_size, 16);
    }

    #[test]
    fn wrong_salt_fails_checksum() {
        let pbs = Pbs::new(512).unwrap();
        let header = LogpackHeader::new(Lsid::new(1));
        let encoded = header.encode(pbs, 1).unwrap();
        assert!(matches!(
            LogpackHeader::decode(&encoded, pbs, 2),
            Err(WireError::ChecksumMismatch)
        ));
    }

    #[test]
    fn too_many_records_rejected() {
        let pbs = Pbs::new(512).unwrap();
        let cap = LogpackHeader::capacity(pbs);
        let mut header = LogpackHeader::new(Lsid::new(0));
        for i in 0..=cap {
            header
                .records
                .push(LogRecord::new(0, 1, u32::try_from(i).unwrap(), RecordFlags::EXIST));
        }
        assert!(matches!(
            header.encode(pbs, 0),
            Err(WireError::TooManyRecords { .. })
        ));
    }
}
