use std::sync::{Condvar, Mutex};

use walb_wire::Lsid;

struct WatchState {
    /// Whether the last `notify` observed a zero `permanent - oldest`
    /// gap; only a 0→nonzero transition raises `pending`, mirroring the
    /// edge-triggered poll contract of spec.md §6.
    last_gap_was_zero: bool,
    pending: bool,
}

/// Stand-in for the `lsids` sysfs attribute's poll/notify contract
/// (spec.md §6): consumers block for an edge event on the
/// `permanent - oldest: 0 → >0` transition, then must seek back to
/// zero before the next wait, exactly like re-arming an edge-triggered
/// epoll fd.
pub struct LsidWatch {
    state: Mutex<WatchState>,
    cv: Condvar,
}

impl Default for LsidWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl LsidWatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WatchState {
                last_gap_was_zero: true,
                pending: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Call whenever `permanent` or `oldest` may have changed.
    pub fn notify(&self, permanent: Lsid, oldest: Lsid) {
        let gap_nonzero = permanent.saturating_sub(oldest) > 0;
        let mut s = self.state.lock().unwrap();
        if gap_nonzero && s.last_gap_was_zero {
            s.pending = true;
            self.cv.notify_all();
        }
        s.last_gap_was_zero = !gap_nonzero;
    }

    /// Blocks until a 0→nonzero edge has fired since the last
    /// `seek_to_zero`.
    pub fn wait_for_nonzero_gap(&self) {
        let mut s = self.state.lock().unwrap();
        while !s.pending {
            s = self.cv.wait(s).unwrap();
        }
    }

    /// Re-arms the watch, as a consumer must do before waiting again
    /// (spec.md §6: "consumers must seek to zero before each read").
    pub fn seek_to_zero(&self) {
        self.state.lock().unwrap().pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_to_nonzero_transition_wakes_waiter() {
        let watch = Arc::new(LsidWatch::new());
        let w2 = Arc::clone(&watch);
        let handle = thread::spawn(move || w2.wait_for_nonzero_gap());
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        watch.notify(Lsid::new(5), Lsid::new(0));
        handle.join().unwrap();
    }

    #[test]
    fn repeated_nonzero_without_seek_does_not_need_rearm() {
        let watch = LsidWatch::new();
        watch.notify(Lsid::new(5), Lsid::new(0));
        watch.wait_for_nonzero_gap();
        watch.seek_to_zero();
        watch.notify(Lsid::new(5), Lsid::new(1));
        watch.notify(Lsid::new(10), Lsid::new(1));
        // still nonzero throughout: no new 0->nonzero edge, so no new event
        let s = watch.state.lock().unwrap();
        assert!(!s.pending);
    }

    #[test]
    fn dropping_to_zero_then_back_up_fires_again() {
        let watch = LsidWatch::new();
        watch.notify(Lsid::new(5), Lsid::new(0));
        watch.wait_for_nonzero_gap();
        watch.seek_to_zero();
        watch.notify(Lsid::new(5), Lsid::new(5));
        watch.notify(Lsid::new(6), Lsid::new(5));
        assert!(watch.state.lock().unwrap().pending);
    }
}
