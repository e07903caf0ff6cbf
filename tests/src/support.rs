//! Device wrappers and a standalone log-replay walk used by several
//! scenario tests.
//!
//! The replay logic mirrors `wlog restore` (crate-external here since
//! `wlog` is a binary with no library surface to import): it walks a
//! window of the ring buffer and writes every `EXIST` record's payload
//! onto a target device, stopping at the first decode failure per the
//! recovery contract.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use walb_device::BlockDevice;
use walb_wire::{Lsid, LogpackHeader, Pbs, RecordFlags, SuperBlock};

pub const LBS: u32 = walb_core::LBS;

/// Gives a test a second handle onto a device also handed to
/// [`walb_core::WalbDevice::create_wdev`], which otherwise takes
/// ownership. Mirrors how a real LDEV is a block device both the
/// kernel pipeline and an external tool like `wlog` can open at once.
pub struct Shared<D>(pub Arc<D>);

impl<D> Shared<D> {
    pub fn new(inner: D) -> Self {
        Self(Arc::new(inner))
    }

    pub fn clone_handle(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<D: BlockDevice> BlockDevice for Shared<D> {
    type Error = D::Error;

    fn pbs(&self) -> Pbs {
        self.0.pbs()
    }

    fn num_blocks(&self) -> u64 {
        self.0.num_blocks()
    }

    fn read_at(&self, block_index: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read_at(block_index, buf)
    }

    fn write_at(&self, block_index: u64, data: &[u8]) -> Result<(), Self::Error> {
        self.0.write_at(block_index, data)
    }

    fn flush(&self) -> Result<(), Self::Error> {
        self.0.flush()
    }

    fn supports_discard(&self) -> bool {
        self.0.supports_discard()
    }

    fn discard_at(&self, block_index: u64, num_blocks: u64) -> Result<(), Self::Error> {
        self.0.discard_at(block_index, num_blocks)
    }
}

/// Wraps a device with an artificial delay before every write, so a
/// test can reliably catch a write mid-flight: logged and pending, but
/// not yet applied to the data device.
pub struct SlowWrite<D> {
    inner: D,
    delay: Duration,
}

impl<D> SlowWrite<D> {
    pub fn new(inner: D, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<D: BlockDevice> BlockDevice for SlowWrite<D> {
    type Error = D::Error;

    fn pbs(&self) -> Pbs {
        self.inner.pbs()
    }

    fn num_blocks(&self) -> u64 {
        self.inner.num_blocks()
    }

    fn read_at(&self, block_index: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.inner.read_at(block_index, buf)
    }

    fn write_at(&self, block_index: u64, data: &[u8]) -> Result<(), Self::Error> {
        thread::sleep(self.delay);
        self.inner.write_at(block_index, data)
    }

    fn flush(&self) -> Result<(), Self::Error> {
        self.inner.flush()
    }

    fn supports_discard(&self) -> bool {
        self.inner.supports_discard()
    }

    fn discard_at(&self, block_index: u64, num_blocks: u64) -> Result<(), Self::Error> {
        self.inner.discard_at(block_index, num_blocks)
    }
}

/// A minimal stand-in superblock, for tests that never format a real
/// one but still need `replay`'s ring geometry and salt.
pub fn fake_superblock(pbs: Pbs, salt: u32, ring_buffer_pb: u64, ring_buffer_offset_pb: u64, ddev_size_lb: u64) -> SuperBlock {
    SuperBlock {
        magic: walb_wire::SUPER_BLOCK_MAGIC,
        checksum: 0,
        salt,
        physical_bs: pbs.value(),
        logical_bs: LBS,
        snapshot_metadata_size: 0,
        ring_buffer_pb,
        ring_buffer_offset_pb,
        ddev_size_lb,
        uuid: [0; 16],
    }
}

/// Replays `[start, end)` of `ldev`'s ring buffer onto `ddev`.
///
/// # Errors
///
/// Returns whatever the underlying device or decode step failed with.
pub fn replay(ldev: &impl BlockDevice, sb: &SuperBlock, ddev: &impl BlockDevice, start: Lsid, end: Lsid) -> anyhow::Result<()> {
    let pbs = ldev.pbs();
    let spb = pbs.value() / LBS;
    let mut lsid = start;

    while lsid < end {
        let header_pos = lsid.ring_pos(sb.ring_buffer_pb) + sb.ring_buffer_offset_pb;
        let mut header_buf = vec![0u8; pbs.as_usize()];
        ldev.read_at(header_pos, &mut header_buf).map_err(anyhow::Error::new)?;
        let header = LogpackHeader::decode(&header_buf, pbs, sb.salt)?;

        if header.is_zero_flush_only() {
            lsid = lsid.add_pb(1);
            continue;
        }

        let mut payload = vec![0u8; header.total_io_size as usize * pbs.as_usize()];
        for i in 0..u64::from(header.total_io_size) {
            let block_pos = lsid.add_pb(u32::try_from(1 + i).unwrap()).ring_pos(sb.ring_buffer_pb) + sb.ring_buffer_offset_pb;
            let start_b = i as usize * pbs.as_usize();
            ldev
                .read_at(block_pos, &mut payload[start_b..start_b + pbs.as_usize()])
                .map_err(anyhow::Error::new)?;
        }

        let mut offset_pb = 0u64;
        for rec in &header.records {
            let flags = rec.flags();
            let pb_len = u64::from(rec.io_size_lb()).div_ceil(u64::from(spb)).max(1);

            if flags.contains(RecordFlags::DISCARD) {
                continue;
            }
            if flags.contains(RecordFlags::PADDING) {
                offset_pb += pb_len;
                continue;
            }

            let block_index = rec.offset_lb() / u64::from(spb);
            let start_b = offset_pb as usize * pbs.as_usize();
            for i in 0..pb_len {
                let chunk_start = start_b + i as usize * pbs.as_usize();
                ddev
                    .write_at(block_index + i, &payload[chunk_start..chunk_start + pbs.as_usize()])
                    .map_err(anyhow::Error::new)?;
            }
            offset_pb += pb_len;
        }
        lsid = lsid.add_pb(1 + header.total_io_size);
    }
    ddev.flush().map_err(anyhow::Error::new)?;
    Ok(())
}
