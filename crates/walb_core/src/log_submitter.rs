use walb_device::BlockDevice;
use walb_wire::{Lsid, Pbs, RecordFlags};

use crate::error::{Result, WalbError};
use crate::pack::{Pack, LBS};

/// Writes a sealed pack's header and payload to LDEV's ring buffer
/// (spec.md §4.2).
pub struct LogSubmitter {
    pbs: Pbs,
    salt: u32,
    ring_buffer_pb: u64,
    ring_buffer_off: u64,
}

impl LogSubmitter {
    #[must_use]
    pub fn new(pbs: Pbs, salt: u32, ring_buffer_pb: u64, ring_buffer_off: u64) -> Self {
        Self {
            pbs,
            salt,
            ring_buffer_pb,
            ring_buffer_off,
        }
    }

    fn ring_block_pos(&self, logpack_lsid: Lsid, offset_pb: u64) -> u64 {
        logpack_lsid.add_pb(u32::try_from(offset_pb).expect("offset_pb fits u32")).ring_pos(self.ring_buffer_pb)
            + self.ring_buffer_off
    }

    fn spb(&self) -> u32 {
        self.pbs.value() / LBS
    }

    /// Submits `pack` to `ldev`. Returns once every constituent bio has
    /// been written (this implementation submits synchronously one
    /// block at a time rather than as a single plugged batch, which
    /// the generic [`BlockDevice`] trait has no concept of).
    ///
    /// # Errors
    ///
    /// Returns [`WalbError::LogIo`] on any failed write or flush; the
    /// caller transitions the device to read-only on this error.
    pub fn submit<D: BlockDevice>(&self, pack: &Pack, ldev: &D) -> Result<()> {
        if pack.is_zero_flush_only {
            ldev.flush().map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
            return Ok(());
        }

        let header_bytes = pack.header.encode(self.pbs, self.salt)?;
        let header_pos = self.ring_block_pos(pack.header.logpack_lsid, 0);
        ldev.write_at(header_pos, &header_bytes)
            .map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;

        let spb = u64::from(self.spb());
        let mut offset_pb = 1u64;
        let mut wrappers = pack.wrappers.iter();

        for rec in &pack.header.records {
            let flags = rec.flags();
            if flags.contains(RecordFlags::DISCARD) {
                wrappers.next();
                continue;
            }

            let pb_len = u64::from(rec.io_size_lb()).div_ceil(spb).max(1);
            if flags.contains(RecordFlags::PADDING) {
                let zeros = vec![0u8; pb_len as usize * self.pbs.as_usize()];
                for i in 0..pb_len {
                    let pos = self.ring_block_pos(pack.header.logpack_lsid, offset_pb + i);
                    ldev.write_at(pos, &zeros[..self.pbs.as_usize()])
                        .map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
                }
                offset_pb += pb_len;
                continue;
            }

            let w = wrappers.next().expect("one wrapper per EXIST record");
            let mut buf = w.data.clone();
            buf.resize(pb_len as usize * self.pbs.as_usize(), 0);
            for i in 0..pb_len {
                let pos = self.ring_block_pos(pack.header.logpack_lsid, offset_pb + i);
                let start = i as usize * self.pbs.as_usize();
                ldev.write_at(pos, &buf[start..start + self.pbs.as_usize()])
                    .map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
            }
            offset_pb += pb_len;
        }

        if pack.is_flush_header {
            ldev.flush().map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsid_state::LsidState;
    use crate::pack::PackBuilder;
    use std::sync::Arc;
    use std::time::Duration;
    use walb_device::MemDevice;

    #[test]
    fn submits_header_and_payload_at_ring_position() {
        let pbs = Pbs::new(4096).unwrap();
        let ring_buffer_pb = 64;
        let ring_off = 4;
        let ldev = MemDevice::new(pbs, ring_off + ring_buffer_pb);
        let submitter = LogSubmitter::new(pbs, 0xABCD, ring_buffer_pb, ring_off);

        let mut builder = PackBuilder::new(pbs, ring_buffer_pb, 0, false, 0, Duration::ZERO);
        let state = LsidState::new(Lsid::new(0));
        let w = Arc::new(crate::bio::BioWrapper::new_write(0, 8, vec![0x77u8; 4096], false, 0));
        builder.process_batch(vec![w], &state).1.unwrap();
        let pack = builder.force_seal(&state).unwrap();

        submitter.submit(&pack, &ldev).unwrap();

        let mut header_buf = vec![0u8; pbs.as_usize()];
        ldev.read_at(ring_off, &mut header_buf).unwrap();
        let decoded = walb_wire::LogpackHeader::decode(&header_buf, pbs, 0xABCD).unwrap();
        assert_eq!(decoded.records.len(), 1);

        let mut payload_buf = vec![0u8; pbs.as_usize()];
        ldev.read_at(ring_off + 1, &mut payload_buf).unwrap();
        assert_eq!(payload_buf, vec![0x77u8; pbs.as_usize()]);
    }
}
