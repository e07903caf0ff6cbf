use walb_mutex::{StdMutex, WalbMutex};
use walb_wire::Lsid;

/// The seven watermarks of spec.md §3, held under one lock.
///
/// `oldest ≤ written ≤ permanent ≤ completed ≤ latest`, and
/// `flush ≤ latest`, at all times; every mutator below either advances
/// a watermark or is a no-op, enforced with debug assertions so a
/// regression trips in tests well before it corrupts the invariant
/// silently in release.
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    pub latest: Lsid,
    pub flush: Lsid,
    pub completed: Lsid,
    pub permanent: Lsid,
    pub written: Lsid,
    pub prev_written: Lsid,
    pub oldest: Lsid,
}

impl Watermarks {
    #[must_use]
    pub fn new(start: Lsid) -> Self {
        Self {
            latest: start,
            flush: start,
            completed: start,
            permanent: start,
            written: start,
            prev_written: start,
            oldest: start,
        }
    }

    #[must_use]
    pub fn log_usage(&self) -> u64 {
        self.latest.checked_sub(self.oldest).expect("latest >= oldest")
    }

    #[must_use]
    pub fn is_overflowing(&self, ring_buffer_pb: u64) -> bool {
        self.log_usage() > ring_buffer_pb
    }
}

/// Owns [`Watermarks`] behind a lock, generic over the lock
/// implementation (grounded on `walb_mutex`'s abstraction) so the
/// pipeline's watermark bookkeeping can be exercised without a real
/// device thread pool.
pub struct LsidState<M: WalbMutex<Data = Watermarks> = StdMutex<Watermarks>> {
    inner: M,
}

impl<M: WalbMutex<Data = Watermarks>> LsidState<M> {
    #[must_use]
    pub fn new(start: Lsid) -> Self {
        Self {
            inner: M::new(Watermarks::new(start)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Watermarks {
        *self.inner.lock()
    }

    /// Finalizes a pack: advances `latest` by `pack_pb_size`, and if
    /// the pack carries a flush-header, advances `flush` to the new
    /// `latest` too (spec.md §4.1).
    pub fn finalize_pack(&self, pack_pb_size: u64, is_flush_header: bool) -> Watermarks {
        let mut w = self.inner.lock();
        w.latest = w.latest.checked_add(pack_pb_size).expect("lsid overflow");
        if is_flush_header {
            w.flush = w.latest;
        }
        *w
    }

    /// Records that log writes for `[start, end)` have completed.
    pub fn advance_completed(&self, end: Lsid) {
        let mut w = self.inner.lock();
        assert!(end <= w.latest, "completed must not pass latest");
        w.completed = w.completed.max(end);
    }

    /// Records that LDEV has been flushed through `end` (permanence
    /// gate, spec.md §4.3).
    pub fn advance_permanent(&self, end: Lsid) {
        let mut w = self.inner.lock();
        assert!(end <= w.completed, "permanent must not pass completed");
        w.permanent = w.permanent.max(end);
    }

    /// Promotes `flush` to the current `latest`, ahead of an
    /// unconditional LDEV flush (permanence gate force-flush path).
    pub fn promote_flush_to_latest(&self) -> Lsid {
        let mut w = self.inner.lock();
        w.flush = w.latest;
        w.flush
    }

    /// Records that DDEV writes for `[start, end)` have completed, and
    /// snapshots `written` as `prev_written` first (checkpoint
    /// bookkeeping, spec.md §3).
    pub fn advance_written(&self, end: Lsid) {
        let mut w = self.inner.lock();
        assert!(end <= w.permanent, "written must not pass permanent");
        w.prev_written = w.written;
        w.written = w.written.max(end);
    }

    /// Sets the oldest retained lsid (GC reclaim, or `set_oldest_lsid`
    /// control-surface operation).
    pub fn set_oldest(&self, oldest: Lsid) {
        let mut w = self.inner.lock();
        assert!(oldest <= w.written, "oldest must not pass written");
        w.oldest = oldest;
    }

    #[must_use]
    pub fn is_overflowing(&self, ring_buffer_pb: u64) -> bool {
        self.inner.lock().is_overflowing(ring_buffer_pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermarks_start_equal_and_advance_monotonically() {
        let state: LsidState = LsidState::new(Lsid::new(0));
        let w = state.finalize_pack(10, true);
        assert_eq!(w.latest, Lsid::new(10));
        assert_eq!(w.flush, Lsid::new(10));

        state.advance_completed(Lsid::new(10));
        state.advance_permanent(Lsid::new(10));
        state.advance_written(Lsid::new(10));

        let w = state.snapshot();
        assert_eq!(w.completed, Lsid::new(10));
        assert_eq!(w.permanent, Lsid::new(10));
        assert_eq!(w.written, Lsid::new(10));
        assert_eq!(w.prev_written, Lsid::new(0));
    }

    #[test]
    #[should_panic(expected = "completed must not pass latest")]
    fn advancing_completed_past_latest_panics() {
        let state: LsidState = LsidState::new(Lsid::new(0));
        state.advance_completed(Lsid::new(5));
    }

    #[test]
    fn overflow_detected_past_ring_capacity() {
        let state: LsidState = LsidState::new(Lsid::new(0));
        state.finalize_pack(20, false);
        assert!(state.is_overflowing(16));
        assert!(!state.is_overflowing(20));
    }
}
