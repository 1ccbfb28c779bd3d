use std::fmt;

use super::ChangeListener;
use super::LimitAlgorithm;

/// A non-dynamic limit with a fixed value.
pub struct FixedLimit {
    limit: usize,
}

impl FixedLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl LimitAlgorithm for FixedLimit {
    fn estimated_limit(&self) -> usize {
        self.limit
    }

    fn on_sample(&self, _start_time: u64, _rtt: u64, _in_flight: usize, _did_drop: bool) {
        // noop for fixed limit
    }

    fn notify_on_change(&self, _listener: ChangeListener) {
        // noop for fixed limit
    }
}

impl fmt::Debug for FixedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedLimit{{limit={}}}", self.limit)
    }
}
