use std::process::Command;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use bitflags::bitflags;

bitflags! {
    /// Per-device status flags (spec.md §4.8).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceFlags: u8 {
        const READ_ONLY    = 1 << 0;
        const FAILURE      = 1 << 1;
        const LOG_OVERFLOW = 1 << 2;
    }
}

/// Minimum spacing between repeated overflow warnings (Design Notes:
/// "specify a minimum inter-message interval (e.g. one every 5 s per
/// device)").
const OVERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Counters {
    n_started_write_bio: usize,
    n_pending_gc: usize,
}

/// Tracks device-wide status flags and the freeze/melt pause mechanism
/// (spec.md §4.8). Unlike the teacher's kernel workqueue bits, there
/// are no `TASK_WORKING` re-entrancy bits here -- the stage threads
/// themselves are the single runner for their stage (see
/// `SPEC_FULL.md`'s "Concurrency realization").
pub struct DeviceState {
    flags: Mutex<DeviceFlags>,
    n_stoppers: Mutex<usize>,
    stopper_cv: Condvar,
    counters: Mutex<Counters>,
    drain_cv: Condvar,
    last_overflow_warn: Mutex<Option<Instant>>,
    exec_path_on_error: Option<String>,
    minor_id: u32,
}

impl DeviceState {
    #[must_use]
    pub fn new(minor_id: u32, exec_path_on_error: Option<String>) -> Self {
        Self {
            flags: Mutex::new(DeviceFlags::empty()),
            n_stoppers: Mutex::new(0),
            stopper_cv: Condvar::new(),
            counters: Mutex::new(Counters::default()),
            drain_cv: Condvar::new(),
            last_overflow_warn: Mutex::new(None),
            exec_path_on_error,
            minor_id,
        }
    }

    #[must_use]
    pub fn flags(&self) -> DeviceFlags {
        *self.flags.lock().unwrap()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.flags().contains(DeviceFlags::READ_ONLY)
    }

    pub fn set_read_only(&self) {
        let mut f = self.flags.lock().unwrap();
        if !f.contains(DeviceFlags::READ_ONLY) {
            tracing::warn!("device transitioning to read-only mode");
        }
        f.insert(DeviceFlags::READ_ONLY);
    }

    pub fn set_failure(&self) {
        self.flags.lock().unwrap().insert(DeviceFlags::FAILURE);
    }

    #[must_use]
    pub fn is_log_overflow(&self) -> bool {
        self.flags().contains(DeviceFlags::LOG_OVERFLOW)
    }

    /// Marks `LOG_OVERFLOW`, rate-limits a warning, and runs the
    /// configured userland error hook with `(minor_id, "overflow")`
    /// (spec.md §4.8, §6).
    pub fn handle_overflow(&self) {
        self.flags.lock().unwrap().insert(DeviceFlags::LOG_OVERFLOW);

        let mut last = self.last_overflow_warn.lock().unwrap();
        let should_warn = last.is_none_or(|t| t.elapsed() >= OVERFLOW_WARN_INTERVAL);
        if should_warn {
            tracing::warn!(minor_id = self.minor_id, "log ring buffer overflow");
            *last = Some(Instant::now());
            drop(last);
            self.run_error_hook("overflow");
        }
    }

    fn run_error_hook(&self, event: &str) {
        let Some(path) = &self.exec_path_on_error else {
            return;
        };
        let minor_id = self.minor_id.to_string();
        match Command::new(path).arg(&minor_id).arg(event).status() {
            Ok(status) if !status.success() => {
                tracing::warn!(?status, path, "error hook exited non-zero");
            }
            Err(e) => tracing::warn!(error = %e, path, "failed to spawn error hook"),
            Ok(_) => {}
        }
    }

    pub fn clear_log_overflow(&self) {
        self.flags.lock().unwrap().remove(DeviceFlags::LOG_OVERFLOW);
    }

    // -- Freeze / melt --

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        *self.n_stoppers.lock().unwrap() > 0
    }

    /// Increments the stopper count (preventing further submit-log
    /// scheduling) and blocks until every in-flight write bio and GC
    /// has drained.
    pub fn freeze(&self) {
        *self.n_stoppers.lock().unwrap() += 1;
        let mut c = self.counters.lock().unwrap();
        while c.n_started_write_bio != 0 || c.n_pending_gc != 0 {
            c = self.drain_cv.wait(c).unwrap();
        }
    }

    /// Decrements the stopper count and wakes any thread waiting to
    /// resume submit-log scheduling.
    pub fn melt(&self) {
        let mut n = self.n_stoppers.lock().unwrap();
        *n = n.saturating_sub(1);
        drop(n);
        self.stopper_cv.notify_all();
    }

    /// Blocks while frozen; a new write must not be accepted into the
    /// pipeline until this returns.
    pub fn wait_while_frozen(&self) {
        let mut n = self.n_stoppers.lock().unwrap();
        while *n > 0 {
            n = self.stopper_cv.wait(n).unwrap();
        }
    }

    pub fn begin_write_bio(&self) {
        self.counters.lock().unwrap().n_started_write_bio += 1;
    }

    pub fn end_write_bio(&self) {
        let mut c = self.counters.lock().unwrap();
        c.n_started_write_bio -= 1;
        if c.n_started_write_bio == 0 && c.n_pending_gc == 0 {
            self.drain_cv.notify_all();
        }
    }

    pub fn begin_gc(&self) {
        self.counters.lock().unwrap().n_pending_gc += 1;
    }

    pub fn end_gc(&self) {
        let mut c = self.counters.lock().unwrap();
        c.n_pending_gc -= 1;
        if c.n_started_write_bio == 0 && c.n_pending_gc == 0 {
            self.drain_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn freeze_blocks_until_counters_drain() {
        let state = Arc::new(DeviceState::new(0, None));
        state.begin_write_bio();

        let state2 = Arc::clone(&state);
        let handle = thread::spawn(move || state2.freeze());

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        state.end_write_bio();
        handle.join().unwrap();
        assert!(state.is_frozen());
    }

    #[test]
    fn melt_wakes_waiters() {
        let state = Arc::new(DeviceState::new(0, None));
        state.freeze();
        let state2 = Arc::clone(&state);
        let handle = thread::spawn(move || state2.wait_while_frozen());
        thread::sleep(Duration::from_millis(20));
        state.melt();
        handle.join().unwrap();
    }

    #[test]
    fn overflow_sets_flag_and_rate_limits_warning() {
        let state = DeviceState::new(7, None);
        state.handle_overflow();
        assert!(state.is_log_overflow());
    }
}
