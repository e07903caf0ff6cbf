//! Generic block device abstraction standing in for the kernel's
//! `struct block_device *` (spec.md §1, out-of-scope: "the kernel
//! block-device registration glue"). The pipeline in `walb_core` is
//! generic over [`BlockDevice`] so it can be driven against an
//! in-memory device in unit tests and against a real file in
//! integration tests, without caring which.
//!
//! Grounded on the teacher's `block_io::BlockDevice<const BLOCK_SIZE:
//! usize>` trait; generalized to runtime-checked physical block sizes
//! (WalB's LDEV/DDEV pair is fixed at construction time but is not a
//! compile-time constant the way the teacher's single 512-byte xv6
//! disk is) and to add `flush` and `discard`, which the pipeline's
//! permanence gate and pack builder require.

mod file;
mod mem;

pub use file::FileDevice;
pub use mem::MemDevice;
use walb_wire::Pbs;

/// A block device addressed by physical-block index.
pub trait BlockDevice: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Physical block size of this device.
    fn pbs(&self) -> Pbs;

    /// Total device size, in physical blocks.
    fn num_blocks(&self) -> u64;

    /// Reads exactly one physical block into `buf`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `buf.len() != self.pbs().as_usize()`.
    fn read_at(&self, block_index: u64, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes exactly one physical block from `data`.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `data.len() != self.pbs().as_usize()`.
    fn write_at(&self, block_index: u64, data: &[u8]) -> Result<(), Self::Error>;

    /// Forces previously submitted writes to stable storage.
    fn flush(&self) -> Result<(), Self::Error>;

    /// Whether this device honors [`BlockDevice::discard_at`] as
    /// anything more than a no-op (spec.md §9, discard open question).
    fn supports_discard(&self) -> bool {
        false
    }

    /// Hints that `[block_index, block_index + num_blocks)` no longer
    /// holds meaningful data. A no-op is always a valid implementation.
    fn discard_at(&self, _block_index: u64, _num_blocks: u64) -> Result<(), Self::Error> {
        Ok(())
    }
}
