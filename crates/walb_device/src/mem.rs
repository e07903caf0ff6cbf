use std::sync::Mutex;

use walb_wire::Pbs;

use crate::BlockDevice;

/// An in-memory block device, used by `walb_core`'s unit tests and by
/// the fast end-to-end scenarios in the top-level `tests` crate
/// (spec.md §8 scenario 2, 3, 6 do not need real wrap-around and run
/// far faster against this than a file).
pub struct MemDevice {
    pbs: Pbs,
    blocks: Mutex<Vec<u8>>,
    num_blocks: u64,
}

impl MemDevice {
    #[must_use]
    pub fn new(pbs: Pbs, num_blocks: u64) -> Self {
        Self {
            pbs,
            blocks: Mutex::new(vec![0u8; pbs.as_usize() * usize::try_from(num_blocks).unwrap()]),
            num_blocks,
        }
    }

    /// Copies out the whole device contents, for assertions in tests.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.blocks.lock().unwrap().clone()
    }
}

impl BlockDevice for MemDevice {
    type Error = std::convert::Infallible;

    fn pbs(&self) -> Pbs {
        self.pbs
    }

    fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    fn read_at(&self, block_index: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        assert_eq!(buf.len(), self.pbs.as_usize());
        let blocks = self.blocks.lock().unwrap();
        let start = self.pbs.as_usize() * usize::try_from(block_index).unwrap();
        buf.copy_from_slice(&blocks[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, block_index: u64, data: &[u8]) -> Result<(), Self::Error> {
        assert_eq!(data.len(), self.pbs.as_usize());
        let mut blocks = self.blocks.lock().unwrap();
        let start = self.pbs.as_usize() * usize::try_from(block_index).unwrap();
        blocks[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}
