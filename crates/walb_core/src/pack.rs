use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use walb_wire::{LogRecord, LogpackHeader, Pbs, RecordFlags};

use crate::bio::BioWrapper;
use crate::error::{Result, WalbError};
use crate::lsid_state::LsidState;

/// Logical block size: WalB's addressing unit for `pos_lb`/`len_lb`,
/// fixed at 512 bytes regardless of the device's physical block size
/// (spec.md §6 glossary: PBS is 512 or 4096, lb is always the 512-byte
/// logical sector).
pub const LBS: u32 = 512;

#[must_use]
fn sectors_per_pb(pbs: Pbs) -> u32 {
    pbs.value() / LBS
}

/// A bounded assemblage of bio wrappers sharing one logpack header
/// (spec.md §3 "Pack (in-memory)").
pub struct Pack {
    pub header: LogpackHeader,
    pub wrappers: Vec<Arc<BioWrapper>>,
    pub is_zero_flush_only: bool,
    pub is_flush_contained: bool,
    pub is_flush_header: bool,
    /// Wrappers not yet removed by the completion/GC stage. Reaching
    /// zero is what lets `written` advance past this pack (spec.md
    /// §4.7).
    remaining: AtomicUsize,
}

impl Pack {
    fn new(logpack_lsid: walb_wire::Lsid) -> Self {
        Self {
            header: LogpackHeader::new(logpack_lsid),
            wrappers: Vec::new(),
            is_zero_flush_only: false,
            is_flush_contained: false,
            is_flush_header: false,
            remaining: AtomicUsize::new(0),
        }
    }

    /// Marks one of this pack's wrappers as fully complete. Returns
    /// `true` exactly once, when the last wrapper finishes.
    pub fn wrapper_done(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Total physical blocks this pack's records span, excluding the
    /// header block itself.
    #[must_use]
    pub fn pack_pb_size(&self) -> u64 {
        1 + u64::from(self.header.total_io_size)
    }

    /// Checks the invariant the Design Notes call `is_prepared_pack_valid`:
    /// a zero-flush-only pack carries no records and exactly one
    /// wrapper, and every other pack's records line up 1:1 with the
    /// padding records plus the wrappers that asked for them.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.is_zero_flush_only {
            return self.header.records.is_empty() && self.wrappers.len() == 1;
        }
        let n_padding = self
            .header
            .records
            .iter()
            .filter(|r| r.flags().contains(RecordFlags::PADDING))
            .count();
        let n_padding = u32::try_from(n_padding).unwrap();
        n_padding == self.header.n_padding
            && self.header.records.len() - n_padding as usize == self.wrappers.len()
    }
}

/// Builds packs from a stream of accepted writes (spec.md §4.1).
///
/// Serial by construction: a single thread owns one `PackBuilder` and
/// feeds it batches drained from the submit queue, matching "Serial
/// component" in the spec text.
pub struct PackBuilder {
    pbs: Pbs,
    ring_buffer_pb: u64,
    max_logpack_pb: u32,
    record_capacity: usize,
    is_error_before_overflow: bool,
    flush_interval_pb: u64,
    flush_interval: Duration,
    open: Option<Pack>,
    acc_lb: u64,
    last_flush_at: Instant,
}

impl PackBuilder {
    #[must_use]
    pub fn new(
        pbs: Pbs,
        ring_buffer_pb: u64,
        max_logpack_kb: u32,
        is_error_before_overflow: bool,
        flush_interval_pb: u64,
        flush_interval: Duration,
    ) -> Self {
        let max_logpack_pb = if max_logpack_kb == 0 {
            u32::MAX
        } else {
            (max_logpack_kb * 1024) / pbs.value()
        };
        Self {
            pbs,
            ring_buffer_pb,
            max_logpack_pb,
            record_capacity: LogpackHeader::capacity(pbs),
            is_error_before_overflow,
            flush_interval_pb,
            flush_interval,
            open: None,
            acc_lb: 0,
            last_flush_at: Instant::now(),
        }
    }

    fn spb(&self) -> u32 {
        sectors_per_pb(self.pbs)
    }

    /// Would adding `len_lb` more logical blocks (rounded to physical
    /// block granularity, plus any padding needed to realign) push the
    /// open pack's `total_io_size` past `max_logpack_pb`?
    fn would_exceed_size(&self, len_lb: u32) -> bool {
        let spb = u64::from(self.spb());
        let rem = self.acc_lb % spb;
        let padding = if rem == 0 { 0 } else { spb - rem };
        let projected_lb = self.acc_lb + padding + u64::from(len_lb);
        projected_lb.div_ceil(spb) > u64::from(self.max_logpack_pb)
    }

    fn seal_needed(&self, next: &Arc<BioWrapper>) -> bool {
        let Some(open) = &self.open else { return false };
        if open.is_zero_flush_only {
            return true;
        }
        if !open.header.records.is_empty() && next.is_flush {
            return true;
        }
        if !next.is_discard() && self.would_exceed_size(next.len_lb) {
            return true;
        }
        open.header.records.len() >= self.record_capacity
    }

    /// Decides whether the sealed pack must carry a flush-header, using
    /// the size and period triggers of spec.md §4.1, and returns
    /// whether the forced-flush period trigger has now reset.
    fn decide_flush_header(&mut self, watermarks_latest: walb_wire::Lsid, watermarks_flush: walb_wire::Lsid) -> bool {
        let size_trigger =
            self.flush_interval_pb > 0 && watermarks_latest.saturating_sub(watermarks_flush) > self.flush_interval_pb;
        let period_trigger = !self.flush_interval.is_zero() && self.last_flush_at.elapsed() >= self.flush_interval;
        if size_trigger || period_trigger {
            self.last_flush_at = Instant::now();
            true
        } else {
            false
        }
    }

    /// Seals the currently open pack (if any) and hands it to
    /// `lsid_state` for watermark bookkeeping, returning the sealed
    /// pack ready for the log submitter.
    fn seal(&mut self, lsid_state: &LsidState) -> Option<Arc<Pack>> {
        let mut pack = self.open.take()?;
        pack.is_zero_flush_only = pack.header.records.is_empty();
        if !pack.is_zero_flush_only {
            let spb = u64::from(self.spb());
            pack.header.total_io_size = u32::try_from(self.acc_lb.div_ceil(spb)).expect("total_io_size fits u32");
        }
        self.acc_lb = 0;
        pack.remaining = AtomicUsize::new(pack.wrappers.len());

        let snapshot = lsid_state.snapshot();
        let pack_pb_size = pack.pack_pb_size();
        // A write that explicitly asked for flush semantics (O_SYNC-like)
        // forces its pack's header to carry flush semantics too, on top
        // of the ordinary size/period triggers.
        pack.is_flush_header = pack.is_flush_contained || self.decide_flush_header(snapshot.latest, snapshot.flush);
        let after = lsid_state.finalize_pack(pack_pb_size, pack.is_flush_header);

        tracing::debug!(
            logpack_lsid = %pack.header.logpack_lsid,
            pack_pb_size,
            is_flush_header = pack.is_flush_header,
            latest = %after.latest,
            "sealed pack"
        );

        Some(Arc::new(pack))
    }

    fn open_new(&mut self, logpack_lsid: walb_wire::Lsid) {
        self.open = Some(Pack::new(logpack_lsid));
        self.acc_lb = 0;
    }

    /// Processes one batch of accepted writes (already dequeued from
    /// the submit queue, up to `n_io_bulk` of them), returning the packs
    /// sealed along the way (in submission order, always present even on
    /// failure so the caller still submits them) and the batch's overall
    /// outcome.
    ///
    /// On a ring-overflow with `is_error_before_overflow` set, every
    /// wrapper still unprocessed in `batch` is failed in place via
    /// [`BioWrapper::complete`] and the outcome is an error; packs
    /// already sealed earlier in the batch are returned regardless.
    pub fn process_batch(&mut self, batch: Vec<Arc<BioWrapper>>, lsid_state: &LsidState) -> (Vec<Arc<Pack>>, Result<()>) {
        let mut sealed = Vec::new();
        let mut batch = batch.into_iter();

        while let Some(w) = batch.next() {
            if self.seal_needed(&w) {
                if let Some(pack) = self.seal(lsid_state) {
                    sealed.push(pack);
                }
                if lsid_state.is_overflowing(self.ring_buffer_pb) && self.is_error_before_overflow {
                    // `w` and every write still unconsumed in this batch
                    // never join a pack; each must still be failed so its
                    // caller's `BioWrapper::wait` does not block forever.
                    w.complete(Err(WalbError::LogOverflow));
                    for w in batch {
                        w.complete(Err(WalbError::LogOverflow));
                    }
                    return (sealed, Err(WalbError::LogOverflow));
                }
                self.open_new(lsid_state.snapshot().latest);
            }
            if self.open.is_none() {
                self.open_new(lsid_state.snapshot().latest);
            }

            let open = self.open.as_mut().expect("just ensured open pack");
            open.is_flush_contained |= w.is_flush;

            if w.len_lb == 0 && w.is_flush {
                assert!(open.wrappers.is_empty(), "zero-length flush must open its pack");
                open.is_zero_flush_only = true;
                open.wrappers.push(w);
                continue;
            }

            if !w.is_discard() {
                let spb = u64::from(self.spb());
                let rem = self.acc_lb % spb;
                if rem != 0 {
                    let pad_lb = u32::try_from(spb - rem).unwrap();
                    let local = u32::try_from(open.header.records.len()).unwrap();
                    open.header
                        .records
                        .push(LogRecord::new(w.pos_lb, pad_lb, local, RecordFlags::PADDING));
                    open.header.n_padding += 1;
                    self.acc_lb += u64::from(pad_lb);
                }
            }

            let local = u32::try_from(open.header.records.len()).unwrap();
            let flags = if w.is_discard() {
                RecordFlags::DISCARD
            } else {
                RecordFlags::EXIST
            };
            let mut record = LogRecord::new(w.pos_lb, w.len_lb, local, flags);
            record.set_checksum(w.checksum);
            w.set_lsid(open.header.logpack_lsid.add_pb(local));
            open.header.records.push(record);
            if !w.is_discard() {
                self.acc_lb += u64::from(w.len_lb);
            }
            open.wrappers.push(w);
        }

        (sealed, Ok(()))
    }

    /// Forces the currently open pack to seal even though no natural
    /// trigger has fired, e.g. when the submit queue has drained and
    /// the permanence gate's period trigger needs a pack to attach the
    /// flush-header to.
    pub fn force_seal(&mut self, lsid_state: &LsidState) -> Option<Arc<Pack>> {
        self.seal(lsid_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walb_wire::Lsid;

    fn builder() -> (PackBuilder, LsidState) {
        let pbs = Pbs::new(4096).unwrap();
        (
            PackBuilder::new(pbs, 1024, 0, false, 0, Duration::ZERO),
            LsidState::new(Lsid::new(0)),
        )
    }

    fn write(pos_lb: u64, len_lb: u32) -> Arc<BioWrapper> {
        Arc::new(BioWrapper::new_write(pos_lb, len_lb, vec![0xAB; len_lb as usize * 512], false, 0))
    }

    #[test]
    fn single_write_forms_one_record() {
        let (mut b, state) = builder();
        let w = write(0, 8);
        let (sealed, outcome) = b.process_batch(vec![w.clone()], &state);
        outcome.unwrap();
        assert!(sealed.is_empty(), "pack stays open until a seal trigger fires");
        let pack = b.force_seal(&state).unwrap();
        assert_eq!(pack.header.records.len(), 1);
        assert_eq!(pack.header.total_io_size, 1);
        assert_eq!(w.lsid(), Some(Lsid::new(0)));
    }

    #[test]
    fn misaligned_write_gets_padding_record() {
        let (mut b, state) = builder();
        let w1 = write(0, 3);
        let w2 = write(3, 3);
        b.process_batch(vec![w1, w2], &state).1.unwrap();
        let pack = b.force_seal(&state).unwrap();
        assert_eq!(pack.header.n_padding, 1);
        assert_eq!(pack.header.records.len(), 3);
        assert_eq!(pack.header.records[1].flags(), RecordFlags::PADDING);
    }

    #[test]
    fn zero_length_flush_forms_zero_flush_only_pack() {
        let (mut b, state) = builder();
        let w = Arc::new(BioWrapper::new_write(0, 0, Vec::new(), true, 0));
        b.process_batch(vec![w], &state).1.unwrap();
        let pack = b.force_seal(&state).unwrap();
        assert!(pack.is_zero_flush_only);
        assert_eq!(pack.header.records.len(), 0);
    }

    #[test]
    fn flush_after_data_seals_pack_first() {
        let (mut b, state) = builder();
        let data = write(0, 8);
        let flush = Arc::new(BioWrapper::new_write(100, 0, Vec::new(), true, 0));
        let (sealed, outcome) = b.process_batch(vec![data, flush], &state);
        outcome.unwrap();
        assert_eq!(sealed.len(), 1, "the flush forces the data-only pack to seal first");
        assert_eq!(sealed[0].header.records.len(), 1);
    }

    #[test]
    fn overflow_fails_unconsumed_writes_but_still_returns_already_sealed_packs() {
        let pbs = Pbs::new(4096).unwrap();
        let mut b = PackBuilder::new(pbs, 2, 4, true, 0, Duration::ZERO);
        let state = LsidState::new(Lsid::new(0));

        let w1 = write(0, 8);
        let w2 = write(8, 8);
        let w3 = write(16, 8);
        let (sealed, outcome) = b.process_batch(vec![w1, w2, w3.clone()], &state);

        assert!(matches!(outcome, Err(WalbError::LogOverflow)));
        assert_eq!(sealed.len(), 2, "packs sealed before the overflow was detected are not discarded");
        assert!(matches!(w3.wait(), Err(WalbError::LogOverflow)), "the write that tripped the overflow check fails in place");
    }
}
