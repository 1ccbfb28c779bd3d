use std::fmt;
use std::sync::Arc;

use super::ChangeListener;
use super::LimitAlgorithm;

/// Transparent wrapper that logs every sample and limit read at debug level.
pub struct TracedLimit<L: ?Sized> {
    delegate: Arc<L>,
}

impl<L: LimitAlgorithm + ?Sized> TracedLimit<L> {
    pub fn new(delegate: Arc<L>) -> Self {
        Self { delegate }
    }
}

impl<L: LimitAlgorithm + ?Sized> LimitAlgorithm for TracedLimit<L> {
    fn estimated_limit(&self) -> usize {
        let estimated = self.delegate.estimated_limit();
        tracing::debug!(limit = estimated, "estimated limit read");
        estimated
    }

    fn on_sample(&self, start_time: u64, rtt: u64, in_flight: usize, did_drop: bool) {
        tracing::debug!(
            start_time,
            rtt_ms = rtt / 1_000_000,
            in_flight,
            did_drop,
            "limit sample"
        );
        self.delegate.on_sample(start_time, rtt, in_flight, did_drop);
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.delegate.notify_on_change(listener);
    }
}

impl<L: LimitAlgorithm + ?Sized> fmt::Debug for TracedLimit<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TracedLimit{{delegate={:?}}}", self.delegate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::AimdLimit;

    #[test]
    fn passes_samples_through_unchanged() {
        let traced = TracedLimit::new(Arc::new(AimdLimit::new(10, 0.9).unwrap()));
        assert_eq!(traced.estimated_limit(), 10);
        traced.on_sample(0, 1_000_000, 10, false);
        assert_eq!(traced.estimated_limit(), 11);
        traced.on_sample(0, 1_000_000, 1, true);
        assert_eq!(traced.estimated_limit(), 10);
    }
}
