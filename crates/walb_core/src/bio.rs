use std::sync::{Condvar, Mutex, OnceLock};

use bitflags::bitflags;
use walb_index::{PendingEntry, RangeEntry};
use walb_wire::Lsid;

use crate::error::WalbError;

bitflags! {
    /// Per-request pipeline state bits (spec.md §3 "Bio wrapper").
    ///
    /// Not all mutually exclusive mid-flight: `PREPARED` and `DELAYED`
    /// can co-occur (a write has a pack-assigned lsid but is still
    /// waiting out the overlap serializer), hence a flag set rather
    /// than a single-variant enum (teacher pattern: `OpenFlags` in
    /// `ov6_syscall`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BioFlags: u8 {
        const STARTED    = 1 << 0;
        const PREPARED   = 1 << 1;
        const SUBMITTED  = 1 << 2;
        const COMPLETED  = 1 << 3;
        const DELAYED    = 1 << 4;
        const DISCARD    = 1 << 5;
        const OVERWRITTEN = 1 << 6;
    }
}

/// A single client I/O, carried through the pipeline from acceptance
/// to completion.
///
/// Four distinct queue memberships exist at different pipeline stages
/// (submit-log, wait-log/pending, submit-data/overlap, wait-data/gc);
/// per the Design Notes these are modeled as membership in four
/// separate collections (the stage `VecDeque`s, the pending index, the
/// overlap table) rather than four intrusive link fields on this
/// struct.
pub struct BioWrapper {
    pub pos_lb: u64,
    pub len_lb: u32,
    pub is_flush: bool,
    /// Payload bytes, `len_lb * lbs` long; empty for a discard or a
    /// zero-length flush.
    pub data: Vec<u8>,
    /// Device-salted checksum of `data`, meaningless for discards.
    pub checksum: u32,
    lsid: OnceLock<Lsid>,
    flags: Mutex<BioFlags>,
    completion: Mutex<Option<std::result::Result<(), WalbError>>>,
    completion_cv: Condvar,
}

impl BioWrapper {
    #[must_use]
    pub fn new_write(pos_lb: u64, len_lb: u32, data: Vec<u8>, is_flush: bool, checksum: u32) -> Self {
        Self {
            pos_lb,
            len_lb,
            is_flush,
            data,
            checksum,
            lsid: OnceLock::new(),
            flags: Mutex::new(BioFlags::STARTED),
            completion: Mutex::new(None),
            completion_cv: Condvar::new(),
        }
    }

    #[must_use]
    pub fn new_discard(pos_lb: u64, len_lb: u32) -> Self {
        Self {
            pos_lb,
            len_lb,
            is_flush: false,
            data: Vec::new(),
            checksum: 0,
            lsid: OnceLock::new(),
            flags: Mutex::new(BioFlags::STARTED | BioFlags::DISCARD),
            completion: Mutex::new(None),
            completion_cv: Condvar::new(),
        }
    }

    #[must_use]
    pub fn is_discard(&self) -> bool {
        self.flags.lock().unwrap().contains(BioFlags::DISCARD)
    }

    /// Assigns the lsid the pack builder computed for this write.
    /// Panics if called twice: the lsid is assigned exactly once, by
    /// the pack builder, before the wrapper is visible to any other
    /// stage.
    pub fn set_lsid(&self, lsid: Lsid) {
        self.lsid.set(lsid).expect("lsid assigned twice");
    }

    #[must_use]
    pub fn lsid(&self) -> Option<Lsid> {
        self.lsid.get().copied()
    }

    fn set_flag(&self, flag: BioFlags) {
        self.flags.lock().unwrap().insert(flag);
    }

    pub fn mark_prepared(&self) {
        self.set_flag(BioFlags::PREPARED);
    }

    pub fn mark_submitted(&self) {
        self.set_flag(BioFlags::SUBMITTED);
    }

    pub fn mark_delayed(&self) {
        self.set_flag(BioFlags::DELAYED);
    }

    pub fn clear_delayed(&self) {
        self.flags.lock().unwrap().remove(BioFlags::DELAYED);
    }

    pub fn mark_overwritten(&self) {
        self.set_flag(BioFlags::OVERWRITTEN);
    }

    #[must_use]
    pub fn is_overwritten(&self) -> bool {
        self.flags.lock().unwrap().contains(BioFlags::OVERWRITTEN)
    }

    #[must_use]
    pub fn flags(&self) -> BioFlags {
        *self.flags.lock().unwrap()
    }

    /// Signals completion to whichever thread is blocked in
    /// [`BioWrapper::wait`], and marks the `COMPLETED` flag.
    pub fn complete(&self, result: std::result::Result<(), WalbError>) {
        self.set_flag(BioFlags::COMPLETED);
        *self.completion.lock().unwrap() = Some(result);
        self.completion_cv.notify_all();
    }

    /// Blocks the calling thread until [`BioWrapper::complete`] has
    /// been called, then returns its result.
    pub fn wait(&self) -> std::result::Result<(), WalbError> {
        let mut guard = self.completion.lock().unwrap();
        while guard.is_none() {
            guard = self.completion_cv.wait(guard).unwrap();
        }
        guard.take().expect("completion set")
    }
}

impl RangeEntry for BioWrapper {
    fn pos_lb(&self) -> u64 {
        self.pos_lb
    }

    fn len_lb(&self) -> u32 {
        self.len_lb
    }
}

impl PendingEntry for BioWrapper {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn mark_overwritten(&self) {
        BioWrapper::mark_overwritten(self);
    }

    fn pending_weight(&self) -> u64 {
        if self.is_discard() {
            1
        } else {
            u64::from(self.len_lb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsid_assigned_once_then_readable() {
        let w = BioWrapper::new_write(0, 1, vec![0u8; 512], false, 0);
        assert!(w.lsid().is_none());
        w.set_lsid(Lsid::new(7));
        assert_eq!(w.lsid(), Some(Lsid::new(7)));
    }

    #[test]
    #[should_panic(expected = "lsid assigned twice")]
    fn assigning_lsid_twice_panics() {
        let w = BioWrapper::new_write(0, 1, vec![0u8; 512], false, 0);
        w.set_lsid(Lsid::new(1));
        w.set_lsid(Lsid::new(2));
    }

    #[test]
    fn wait_blocks_until_complete_is_called() {
        use std::sync::Arc;
        use std::thread;

        let w = Arc::new(BioWrapper::new_write(0, 1, vec![0u8; 512], false, 0));
        let w2 = Arc::clone(&w);
        let handle = thread::spawn(move || {
            w2.complete(Ok(()));
        });
        assert!(w.wait().is_ok());
        handle.join().unwrap();
        assert!(w.flags().contains(BioFlags::COMPLETED));
    }
}
