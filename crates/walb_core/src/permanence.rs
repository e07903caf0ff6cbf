use std::thread;
use std::time::{Duration, Instant};

use walb_device::BlockDevice;
use walb_wire::Lsid;

use crate::error::{Result, WalbError};
use crate::lsid_state::LsidState;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Enforces "data is never submitted before its logpack is permanent"
/// (spec.md §4.3).
pub struct PermanenceGate {
    flush_interval_pb: u64,
    flush_interval: Duration,
    last_flush_at: Instant,
}

impl PermanenceGate {
    #[must_use]
    pub fn new(flush_interval_pb: u64, flush_interval: Duration) -> Self {
        Self {
            flush_interval_pb,
            flush_interval,
            last_flush_at: Instant::now(),
        }
    }

    /// When both triggers are disabled the gate is a benchmarking
    /// no-op: durability is not guaranteed (spec.md §4.3).
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.flush_interval_pb == 0 && self.flush_interval.is_zero()
    }

    fn should_force_flush(&self, latest: Lsid, flush: Lsid) -> bool {
        let size_trigger = self.flush_interval_pb > 0 && latest.saturating_sub(flush) > self.flush_interval_pb;
        let period_trigger = !self.flush_interval.is_zero() && self.last_flush_at.elapsed() >= self.flush_interval;
        size_trigger || period_trigger
    }

    /// Blocks until `required ≤ permanent`, flushing LDEV if the
    /// configured interval (size or period) has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`WalbError::LogIo`] if the forced flush fails; the
    /// caller must transition the device to read-only on this error
    /// (spec.md §7).
    pub fn ensure_permanent<D: BlockDevice>(&mut self, required: Lsid, lsid_state: &LsidState, ldev: &D) -> Result<()> {
        if self.is_noop() {
            return Ok(());
        }
        loop {
            let w = lsid_state.snapshot();
            if required <= w.permanent {
                return Ok(());
            }
            if self.should_force_flush(w.latest, w.flush) {
                lsid_state.promote_flush_to_latest();
                ldev.flush().map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
                self.last_flush_at = Instant::now();
                let w = lsid_state.snapshot();
                lsid_state.advance_permanent(w.completed);
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}
