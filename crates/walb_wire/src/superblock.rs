//! LDEV superblock (spec.md §6, "LDEV layout").

use dataview::{Pod, PodMethods as _};

use crate::{checksum, error::WireError};

/// Magic value stored in [`SuperBlock::magic`].
pub const SUPER_BLOCK_MAGIC: u32 = 0x574c_4231; // "WLB1"

/// Fixed offset of the superblock within LDEV, in bytes (spec.md §6).
pub const SUPER_BLOCK_OFFSET_BYTES: u64 = 4096;

/// In-memory, POD-compatible copy of the on-disk superblock.
///
/// `salt` is the device-wide checksum salt referenced throughout §3/§4:
/// every logpack header on this device is checksummed with it, which is
/// what makes a header "uniquely bound to its device" (a header copied
/// onto the wrong device's ring buffer fails checksum verification).
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct SuperBlock {
    pub magic: u32,
    pub checksum: u32,
    pub salt: u32,
    pub physical_bs: u32,
    pub logical_bs: u32,
    pub snapshot_metadata_size: u32,
    pub ring_buffer_pb: u64,
    pub ring_buffer_offset_pb: u64,
    pub ddev_size_lb: u64,
    pub uuid: [u8; 16],
}

impl SuperBlock {
    /// # Errors
    ///
    /// Returns [`WireError::TooManyRecords`]-shaped errors never occur
    /// here; this can only fail with [`WireError::ShortBuffer`] if `buf`
    /// is smaller than the struct, which callers guard against by
    /// always passing a PBS-sized block.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), WireError> {
        if buf.len() < core::mem::size_of::<Self>() {
            return Err(WireError::ShortBuffer {
                got: buf.len(),
                want: core::mem::size_of::<Self>(),
            });
        }
        let mut copy = *self;
        copy.checksum = 0;
        let bytes = copy.as_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        let sum = checksum::checksum(&buf[..bytes.len()], self.salt);
        buf[..bytes.len()][4..8].copy_from_slice(&sum.to_ne_bytes());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`WireError::BadMagic`] or [`WireError::ChecksumMismatch`]
    /// if `buf` does not decode to a valid superblock.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let size = core::mem::size_of::<Self>();
        if buf.len() < size {
            return Err(WireError::ShortBuffer {
                got: buf.len(),
                want: size,
            });
        }
        let sb: Self = *buf.as_data_view().get::<Self>(0);
        if sb.magic != SUPER_BLOCK_MAGIC {
            return Err(WireError::BadMagic(sb.magic));
        }
        let mut verify_buf = buf[..size].to_vec();
        verify_buf[4..8].copy_from_slice(&0u32.to_ne_bytes());
        if !checksum::verify(&verify_buf, sb.salt, sb.checksum) {
            return Err(WireError::ChecksumMismatch);
        }
        Ok(sb)
    }
}
