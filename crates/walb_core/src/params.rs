use std::time::Duration;

use crate::error::{Result, WalbError};

/// What to do with a discard request whose data device does not
/// support `BlockDevice::discard_at` as anything but a no-op.
///
/// Open question in spec.md §9, resolved here: elide it (current
/// driver behavior) by default, or log it to the WAL as a metadata-only
/// record for later replay fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardPolicy {
    #[default]
    Elide,
    LogAsNoop,
}

/// Per-device creation options and process-wide tunables (spec.md §6).
///
/// Grounded on the teacher's `param.rs` / `ov6_kernel_params` pattern of
/// a single struct of named constants, generalized here to a runtime,
/// validated configuration value since WalB devices are created (and
/// reconfigured) dynamically rather than compiled in.
#[derive(Debug, Clone)]
pub struct WalbParams {
    /// 0 = unlimited.
    pub max_logpack_kb: u32,
    pub max_pending_mb: u32,
    pub min_pending_mb: u32,
    pub queue_stop_timeout: Duration,
    pub flush_interval_mb: u32,
    pub flush_interval: Duration,
    pub n_pack_bulk: usize,
    pub n_io_bulk: usize,
    /// Number of data-submit workers drawn from the device's pool
    /// (spec.md §5: "Parallel workers on a shared pool"). Each worker
    /// independently dequeues overlap-cleared writes and submits them
    /// to DDEV, which is what lets genuinely concurrent overlapping
    /// writes exercise the delay-and-wake path of
    /// [`crate::device::WalbDevice`]'s data stage instead of degenerating
    /// to one writer at a time.
    pub n_data_workers: usize,
    pub name: String,

    /// `is_sync_superblock`: "may skip fsync of superblock during
    /// checkpoint" (spec.md §9 open question); not relied on for
    /// pipeline correctness anywhere.
    pub is_sync_superblock: bool,
    pub is_sort_data_io: bool,
    pub exec_path_on_error: Option<String>,
    pub is_error_before_overflow: bool,
    pub discard_policy: DiscardPolicy,
}

impl WalbParams {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            max_logpack_kb: 0,
            max_pending_mb: 32,
            min_pending_mb: 16,
            queue_stop_timeout: Duration::from_millis(100),
            flush_interval_mb: 16,
            flush_interval: Duration::from_millis(100),
            n_pack_bulk: 128,
            n_io_bulk: 1024,
            n_data_workers: 4,
            name: name.into(),
            is_sync_superblock: true,
            is_sort_data_io: true,
            exec_path_on_error: None,
            is_error_before_overflow: false,
            discard_policy: DiscardPolicy::default(),
        }
    }

    /// Validates the creation options named in spec.md §6, e.g.
    /// `flush_interval_mb ≤ max_pending_mb / 2`.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_mb == 0 {
            return Err(WalbError::InvalidConfig("max_pending_mb must be > 0"));
        }
        if self.min_pending_mb == 0 {
            return Err(WalbError::InvalidConfig("min_pending_mb must be > 0"));
        }
        if self.min_pending_mb >= self.max_pending_mb {
            return Err(WalbError::InvalidConfig("min_pending_mb must be < max_pending_mb"));
        }
        if self.flush_interval_mb > self.max_pending_mb / 2 {
            return Err(WalbError::InvalidConfig(
                "flush_interval_mb must be <= max_pending_mb / 2",
            ));
        }
        if self.n_pack_bulk == 0 {
            return Err(WalbError::InvalidConfig("n_pack_bulk must be > 0"));
        }
        if self.n_io_bulk == 0 {
            return Err(WalbError::InvalidConfig("n_io_bulk must be > 0"));
        }
        if self.n_data_workers == 0 {
            return Err(WalbError::InvalidConfig("n_data_workers must be > 0"));
        }
        Ok(())
    }

    #[must_use]
    pub fn max_pending_sectors(&self, lbs: usize) -> u64 {
        u64::from(self.max_pending_mb) * 1024 * 1024 / lbs as u64
    }

    #[must_use]
    pub fn min_pending_sectors(&self, lbs: usize) -> u64 {
        u64::from(self.min_pending_mb) * 1024 * 1024 / lbs as u64
    }

    /// `0` disables the size-triggered forced flush (unbounded).
    #[must_use]
    pub fn flush_interval_pb(&self, pbs: usize) -> u64 {
        if self.flush_interval_mb == 0 {
            0
        } else {
            u64::from(self.flush_interval_mb) * 1024 * 1024 / pbs as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_flush_interval_over_half_max_pending() {
        let mut params = WalbParams::new("test");
        params.max_pending_mb = 32;
        params.flush_interval_mb = 17;
        assert!(params.validate().is_err());
    }

    #[test]
    fn default_params_are_valid() {
        assert!(WalbParams::new("test").validate().is_ok());
    }
}
