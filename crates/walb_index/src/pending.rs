use std::sync::Arc;

use crate::range::{RangeEntry, RangeIndex};

/// A write still in flight between "accepted" and "data written"
/// (spec.md §4.4): reads that land on its range must see its bytes
/// even though they are not yet in the data device.
pub trait PendingEntry: RangeEntry {
    /// The write's payload, `len_lb() * lbs` bytes.
    fn data(&self) -> &[u8];

    /// Called when a later pending write fully covers this entry's
    /// range, so its completion no longer needs to touch the index
    /// (spec.md §3: "an incoming write fully overwritten by a newer
    /// pending write may be marked `overwritten` and skipped on
    /// completion removal"). No-op by default.
    fn mark_overwritten(&self) {}

    /// Weight this entry contributes to `pending_sectors` for
    /// backpressure purposes. Discards are metadata-only and count as
    /// `1` regardless of their logical length (spec.md §4.4).
    fn pending_weight(&self) -> u64 {
        u64::from(self.len_lb())
    }
}

/// Tracks writes that have been accepted into a pack but whose data is
/// not yet durable on the data device, so that a concurrent read can be
/// patched with the pending bytes instead of racing the data submitter.
///
/// Grounded on the Design Notes' "ordered map keyed by `pos_lb`"
/// guidance; entries sharing a `pos_lb` are kept in insertion order so
/// that `check_and_copy` can apply overlapping overwrites oldest first,
/// letting a later write's bytes win over an earlier one's, which is
/// the same precedence the overlap table's FIFO submission order
/// implies at the storage layer.
pub struct PendingIndex<T> {
    inner: RangeIndex<T>,
    lbs: usize,
    pending_sectors: u64,
}

impl<T: PendingEntry> PendingIndex<T> {
    #[must_use]
    pub fn new(lbs: usize) -> Self {
        Self {
            inner: RangeIndex::new(),
            lbs,
            pending_sectors: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sum of [`PendingEntry::pending_weight`] across every entry still
    /// held, the quantity the builder's backpressure freeze/unfreeze
    /// thresholds are compared against (spec.md §4.4).
    #[must_use]
    pub fn pending_sectors(&self) -> u64 {
        self.pending_sectors
    }

    /// Inserts `entry`, then marks and drops any existing pending
    /// entry whose range `entry` fully covers -- such an entry can
    /// never again contribute bytes a reader would observe, so its
    /// completion should skip the index removal it would otherwise
    /// perform (spec.md §3, §4.4 bullet 1).
    pub fn insert(&mut self, entry: Arc<T>) {
        let mut cursor = self.inner.overlapping(entry.pos_lb(), entry.len_lb());
        while let Some(existing) = cursor.peek() {
            let covered = existing.pos_lb() >= entry.pos_lb() && existing.end_lb() <= entry.end_lb();
            if covered {
                existing.mark_overwritten();
                if let Some(removed) = cursor.remove_current() {
                    self.pending_sectors -= removed.pending_weight();
                }
            } else {
                cursor.advance();
            }
        }
        self.pending_sectors += entry.pending_weight();
        self.inner.insert(entry);
    }

    pub fn delete(&mut self, entry: &Arc<T>) -> bool {
        let removed = self.inner.remove(entry);
        if removed {
            self.pending_sectors -= entry.pending_weight();
        }
        removed
    }

    /// Patches `read_buf` (covering `[read_pos_lb, read_pos_lb +
    /// read_len_lb)`) with the bytes of every pending write that
    /// overlaps it, oldest insertion first so later overwrites win.
    ///
    /// Returns the number of pending entries that contributed bytes,
    /// so the data submitter can decide whether the underlying read
    /// was still necessary at all.
    pub fn check_and_copy(&self, read_pos_lb: u64, read_len_lb: u32, read_buf: &mut [u8]) -> usize {
        assert_eq!(read_buf.len(), read_len_lb as usize * self.lbs);
        let matches = self.inner.overlapping_snapshot(read_pos_lb, read_len_lb);
        for entry in &matches {
            let overlap_start = entry.pos_lb().max(read_pos_lb);
            let overlap_end = entry.end_lb().min(read_pos_lb + u64::from(read_len_lb));
            if overlap_start >= overlap_end {
                continue;
            }
            let src_off = (overlap_start - entry.pos_lb()) as usize * self.lbs;
            let dst_off = (overlap_start - read_pos_lb) as usize * self.lbs;
            let len = (overlap_end - overlap_start) as usize * self.lbs;
            read_buf[dst_off..dst_off + len].copy_from_slice(&entry.data()[src_off..src_off + len]);
        }
        matches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Write {
        pos_lb: u64,
        data: Vec<u8>,
        overwritten: std::sync::atomic::AtomicBool,
    }

    impl Write {
        fn new(pos_lb: u64, data: Vec<u8>) -> Self {
            Self {
                pos_lb,
                data,
                overwritten: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl RangeEntry for Write {
        fn pos_lb(&self) -> u64 {
            self.pos_lb
        }
        fn len_lb(&self) -> u32 {
            (self.data.len() / 512) as u32
        }
    }

    impl PendingEntry for Write {
        fn data(&self) -> &[u8] {
            &self.data
        }
        fn mark_overwritten(&self) {
            self.overwritten.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn check_and_copy_patches_overlapping_bytes() {
        let mut idx = PendingIndex::new(512);
        idx.insert(Arc::new(Write::new(2, vec![0xAA; 512])));

        let mut buf = vec![0u8; 512 * 4];
        let n = idx.check_and_copy(0, 4, &mut buf);
        assert_eq!(n, 1);
        assert_eq!(&buf[0..1024], &vec![0u8; 1024][..]);
        assert_eq!(&buf[1024..1536], &vec![0xAAu8; 512][..]);
        assert_eq!(&buf[1536..2048], &vec![0u8; 512][..]);
    }

    #[test]
    fn later_insert_wins_on_overlap() {
        let mut idx = PendingIndex::new(512);
        idx.insert(Arc::new(Write::new(0, vec![0x11; 512])));
        idx.insert(Arc::new(Write::new(0, vec![0x22; 512])));

        let mut buf = vec![0u8; 512];
        idx.check_and_copy(0, 1, &mut buf);
        assert_eq!(buf, vec![0x22u8; 512]);
    }

    #[test]
    fn delete_removes_entry_from_future_copies() {
        let mut idx = PendingIndex::new(512);
        let entry = Arc::new(Write::new(0, vec![0x33; 512]));
        idx.insert(Arc::clone(&entry));
        assert!(idx.delete(&entry));

        let mut buf = vec![0u8; 512];
        let n = idx.check_and_copy(0, 1, &mut buf);
        assert_eq!(n, 0);
        assert_eq!(buf, vec![0u8; 512]);
    }

    #[test]
    fn fully_covered_entry_is_marked_overwritten_and_dropped() {
        let mut idx = PendingIndex::new(512);
        let old = Arc::new(Write::new(2, vec![0x11; 512]));
        idx.insert(Arc::clone(&old));
        assert_eq!(idx.len(), 1);

        let new = Arc::new(Write::new(0, vec![0x22; 512 * 4]));
        idx.insert(Arc::clone(&new));

        assert!(old.overwritten.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(idx.len(), 1, "the fully-covered older entry was dropped, not just shadowed");
        assert!(!idx.delete(&old), "an overwritten entry is no longer tracked by the index");
    }

    #[test]
    fn pending_sectors_tracks_weight_across_insert_and_delete() {
        let mut idx = PendingIndex::new(512);
        let a = Arc::new(Write::new(0, vec![0u8; 512 * 4]));
        idx.insert(Arc::clone(&a));
        assert_eq!(idx.pending_sectors(), 4);

        let b = Arc::new(Write::new(100, vec![0u8; 512 * 2]));
        idx.insert(Arc::clone(&b));
        assert_eq!(idx.pending_sectors(), 6);

        idx.delete(&a);
        assert_eq!(idx.pending_sectors(), 2);
    }
}
