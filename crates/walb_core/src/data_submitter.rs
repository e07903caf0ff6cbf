use std::sync::Arc;

use walb_device::BlockDevice;

use crate::bio::BioWrapper;
use crate::error::{Result, WalbError};
use crate::pack::LBS;

/// Submits data writes that the overlap serializer has cleared for
/// DDEV submission (spec.md §4.6).
///
/// Flush semantics are never forwarded to DDEV here: the log's
/// permanence already satisfies durability for the write (the
/// permanence gate ran before the wrapper ever reached this stage), so
/// there is nothing to strip -- `BlockDevice::write_at` simply has no
/// flush flag to carry one. Likewise chunk-boundary splitting is not
/// needed: `BlockDevice` addresses whole physical blocks already, so
/// there is no larger "chunk" unit below it to split along.
pub struct DataSubmitter {
    is_sort_data_io: bool,
}

impl DataSubmitter {
    #[must_use]
    pub fn new(is_sort_data_io: bool) -> Self {
        Self { is_sort_data_io }
    }

    /// Insertion-sorts `batch` by `pos_lb` in place when configured to.
    /// `O(n^2)` worst case, `O(n)` for already-sequential batches
    /// (spec.md §4.6).
    fn maybe_sort(&self, batch: &mut [Arc<BioWrapper>]) {
        if !self.is_sort_data_io {
            return;
        }
        for i in 1..batch.len() {
            let mut j = i;
            while j > 0 && batch[j - 1].pos_lb > batch[j].pos_lb {
                batch.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    /// Submits one bulk batch of ready writes to `ddev`. Every wrapper
    /// is completed (successfully or not) before this returns.
    pub fn submit_batch<D: BlockDevice>(&self, mut batch: Vec<Arc<BioWrapper>>, ddev: &D) -> Result<()> {
        self.maybe_sort(&mut batch);
        let spb = u64::from(ddev.pbs().value() / LBS);

        for w in &batch {
            let block_index = w.pos_lb / spb;
            let n_blocks = u64::from(w.len_lb).div_ceil(spb).max(1);

            if w.is_discard() {
                if let Err(e) = ddev.discard_at(block_index, n_blocks) {
                    w.complete(Err(WalbError::DataIo(std::io::Error::other(e))));
                    return Err(WalbError::DataIo(std::io::Error::other("discard failed")));
                }
                continue;
            }

            for i in 0..n_blocks {
                let start = i as usize * ddev.pbs().as_usize();
                let end = start + ddev.pbs().as_usize();
                let chunk = if end <= w.data.len() {
                    w.data[start..end].to_vec()
                } else {
                    let mut padded = w.data.get(start..).unwrap_or(&[]).to_vec();
                    padded.resize(ddev.pbs().as_usize(), 0);
                    padded
                };
                if let Err(e) = ddev.write_at(block_index + i, &chunk) {
                    let err = WalbError::DataIo(std::io::Error::other(e));
                    w.complete(Err(err));
                    return Err(WalbError::DataIo(std::io::Error::other("data write failed")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walb_device::MemDevice;
    use walb_wire::Pbs;

    #[test]
    fn sorts_out_of_order_batch_by_pos_lb() {
        let submitter = DataSubmitter::new(true);
        let mut batch = vec![
            Arc::new(BioWrapper::new_write(16, 8, vec![2u8; 4096], false, 0)),
            Arc::new(BioWrapper::new_write(0, 8, vec![1u8; 4096], false, 0)),
            Arc::new(BioWrapper::new_write(8, 8, vec![3u8; 4096], false, 0)),
        ];
        submitter.maybe_sort(&mut batch);
        let positions: Vec<u64> = batch.iter().map(|w| w.pos_lb).collect();
        assert_eq!(positions, vec![0, 8, 16]);
    }

    #[test]
    fn submit_batch_writes_payload_to_correct_block() {
        let submitter = DataSubmitter::new(false);
        let ddev = MemDevice::new(Pbs::new(4096).unwrap(), 4);
        let w = Arc::new(BioWrapper::new_write(8, 8, vec![0x55u8; 4096], false, 0));
        submitter.submit_batch(vec![w], &ddev).unwrap();

        let mut buf = [0u8; 4096];
        ddev.read_at(1, &mut buf).unwrap();
        assert_eq!(buf, [0x55u8; 4096]);
    }
}
