use core::fmt;

use dataview::Pod;

/// Log sequence identifier: a monotonic index of a position in the WAL
/// stream, counted in physical blocks.
///
/// `Lsid` is intentionally a thin newtype (teacher pattern: `BlockNo` /
/// `InodeNo` in `ov6_fs_types`) so that the seven watermarks in
/// `walb_core::lsid::Watermarks` cannot be confused with plain block
/// counts or sector offsets at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct Lsid(u64);

impl Lsid {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<u64> {
        self.0.checked_sub(rhs.0)
    }

    /// Saturating distance `self - rhs`, clamped to zero when `rhs > self`.
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> u64 {
        self.0.saturating_sub(rhs.0)
    }

    #[must_use]
    pub const fn add_pb(self, n_pb: u32) -> Self {
        Self(self.0 + n_pb as u64)
    }

    /// Ring-buffer relative position: `self mod ring_buffer_pb`.
    #[must_use]
    pub const fn ring_pos(self, ring_buffer_pb: u64) -> u64 {
        self.0 % ring_buffer_pb
    }
}

impl fmt::Display for Lsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_numeric() {
        assert!(Lsid::new(3) < Lsid::new(4));
        assert_eq!(Lsid::new(3).saturating_sub(Lsid::new(10)), 0);
        assert_eq!(Lsid::new(10).saturating_sub(Lsid::new(3)), 7);
    }

    #[test]
    fn ring_pos_wraps() {
        assert_eq!(Lsid::new(1025).ring_pos(1024), 1);
        assert_eq!(Lsid::new(1024).ring_pos(1024), 0);
    }
}
