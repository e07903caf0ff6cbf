use std::collections::BTreeMap;
use std::sync::Arc;

/// Something that occupies `[pos_lb, pos_lb + len_lb)` in the logical
/// address space of a device.
pub trait RangeEntry {
    fn pos_lb(&self) -> u64;
    fn len_lb(&self) -> u32;

    fn end_lb(&self) -> u64 {
        self.pos_lb() + u64::from(self.len_lb())
    }

    fn overlaps(&self, pos_lb: u64, len_lb: u32) -> bool {
        self.pos_lb() < pos_lb + u64::from(len_lb) && pos_lb < self.end_lb()
    }
}

/// An ordered map keyed by `pos_lb`, used for both the pending index
/// (spec.md §4.4) and the overlap table (spec.md §4.5). A `BTreeMap`
/// gives both the range query ("everything that could overlap
/// `[pos_lb, pos_lb + len_lb)`") and stable iteration while entries are
/// removed mid-scan that a hash table cannot: the Design Notes call for
/// "an ordered map keyed by `pos_lb` (red-black or B-tree map)", which
/// is exactly what `BTreeMap` is.
///
/// Entries sharing the same `pos_lb` (repeated overwrites of the same
/// starting offset) are kept in insertion order in the bucket, which is
/// what gives the overlap table its FIFO submission ordering.
pub struct RangeIndex<T> {
    by_pos: BTreeMap<u64, Vec<Arc<T>>>,
    max_len_lb: u64,
    len: usize,
}

impl<T> Default for RangeIndex<T> {
    fn default() -> Self {
        Self {
            by_pos: BTreeMap::new(),
            max_len_lb: 0,
            len: 0,
        }
    }
}

impl<T: RangeEntry> RangeIndex<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, entry: Arc<T>) {
        self.max_len_lb = self.max_len_lb.max(u64::from(entry.len_lb()));
        self.by_pos.entry(entry.pos_lb()).or_default().push(entry);
        self.len += 1;
    }

    /// Removes a specific entry by pointer identity. Returns `true` if
    /// it was present.
    pub fn remove(&mut self, entry: &Arc<T>) -> bool {
        let pos_lb = entry.pos_lb();
        let Some(bucket) = self.by_pos.get_mut(&pos_lb) else {
            return false;
        };
        let Some(idx) = bucket.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            return false;
        };
        bucket.remove(idx);
        if bucket.is_empty() {
            self.by_pos.remove(&pos_lb);
        }
        self.len -= 1;
        true
    }

    /// Lower bound of `pos_lb` keys that could possibly contain an
    /// entry overlapping `[pos_lb, pos_lb + len_lb)`, given the widest
    /// entry ever inserted.
    fn lower_bound(&self, pos_lb: u64) -> u64 {
        pos_lb.saturating_sub(self.max_len_lb.saturating_sub(1))
    }

    /// Opens a cursor over every entry that overlaps
    /// `[pos_lb, pos_lb + len_lb)`, in ascending `pos_lb` order (and
    /// FIFO order within a shared `pos_lb`).
    ///
    /// The cursor snapshots matching entries up front as `Arc` clones,
    /// so [`Cursor::remove_current`] can mutate the underlying map
    /// without invalidating the scan in progress -- the caller holds
    /// `&mut self` for the cursor's whole lifetime, so no other
    /// mutation can interleave.
    pub fn overlapping(&mut self, pos_lb: u64, len_lb: u32) -> Cursor<'_, T> {
        let lo = self.lower_bound(pos_lb);
        let hi = pos_lb + u64::from(len_lb);
        let matches = self
            .by_pos
            .range(lo..hi)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|e| e.overlaps(pos_lb, len_lb))
            .cloned()
            .collect();
        Cursor {
            index: self,
            matches,
            pos: 0,
        }
    }

    /// Iterates every entry currently held, in ascending `pos_lb` order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.by_pos.values().flat_map(|bucket| bucket.iter())
    }

    /// Read-only equivalent of [`RangeIndex::overlapping`], for callers
    /// that only need to inspect matches (the pending index's
    /// `check_and_copy`) rather than delete while scanning.
    pub fn overlapping_snapshot(&self, pos_lb: u64, len_lb: u32) -> Vec<Arc<T>> {
        let lo = self.lower_bound(pos_lb);
        let hi = pos_lb + u64::from(len_lb);
        self.by_pos
            .range(lo..hi)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|e| e.overlaps(pos_lb, len_lb))
            .cloned()
            .collect()
    }
}

/// The state a [`Cursor`] is in, mirroring the BEGIN/DATA/DELETED/END
/// states the Design Notes describe for in-place scan-and-delete
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Begin,
    Data,
    Deleted,
    End,
}

/// A scan over a snapshot of [`RangeIndex`] matches that supports
/// peeking the current entry, advancing, and removing the current
/// entry from the underlying index without disturbing the scan.
pub struct Cursor<'a, T> {
    index: &'a mut RangeIndex<T>,
    matches: Vec<Arc<T>>,
    pos: usize,
}

impl<'a, T: RangeEntry> Cursor<'a, T> {
    fn state(&self) -> CursorState {
        if self.matches.is_empty() {
            CursorState::End
        } else if self.pos >= self.matches.len() {
            CursorState::End
        } else if self.pos == 0 {
            CursorState::Begin
        } else {
            CursorState::Data
        }
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Arc<T>> {
        self.matches.get(self.pos)
    }

    pub fn advance(&mut self) {
        if self.state() != CursorState::End {
            self.pos += 1;
        }
    }

    /// Removes the entry currently under the cursor from the
    /// underlying index, and advances past it. Returns the removed
    /// entry, or `None` if the cursor is already past the end.
    pub fn remove_current(&mut self) -> Option<Arc<T>> {
        let entry = self.matches.get(self.pos)?.clone();
        self.index.remove(&entry);
        self.matches.remove(self.pos);
        entry.into()
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        self.state() == CursorState::End
    }
}
