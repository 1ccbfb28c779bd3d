use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::ChangeListener;
use super::LimitAlgorithm;

/// A fixed limit that can be changed at runtime.
///
/// Mostly useful for testing and for operator-driven overrides.
pub struct SettableLimit {
    limit: AtomicUsize,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl SettableLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.max(1)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Replace the limit, notifying change listeners.
    pub fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        self.limit.store(limit, Ordering::Release);
        for listener in self.listeners.lock().iter() {
            listener(limit);
        }
    }
}

impl LimitAlgorithm for SettableLimit {
    fn estimated_limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    fn on_sample(&self, _start_time: u64, _rtt: u64, _in_flight: usize, _did_drop: bool) {
        // noop, the limit only moves through set_limit
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.listeners.lock().push(listener);
    }
}

impl fmt::Debug for SettableLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SettableLimit{{limit={}}}",
            self.limit.load(Ordering::Acquire)
        )
    }
}
