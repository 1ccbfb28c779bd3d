use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::measurements::SampleWindow;

use super::ChangeListener;
use super::LimitAlgorithm;

const MIN_WINDOW_TIME_FLOOR: Duration = Duration::from_millis(100);
const MIN_WINDOW_SIZE: usize = 10;

const DEFAULT_MIN_WINDOW_TIME: Duration = Duration::from_secs(1);
const DEFAULT_MAX_WINDOW_TIME: Duration = Duration::from_secs(1);
const DEFAULT_MIN_RTT_THRESHOLD: Duration = Duration::from_millis(100);
const DEFAULT_WINDOW_SIZE: usize = 10;

/// Decorator that buffers samples into a window and forwards one aggregated
/// sample to the wrapped estimator per closed window.
///
/// Shields noisy estimators from per-operation jitter: only windows with
/// more than `window_size` samples are forwarded, and samples shorter than
/// `min_rtt_threshold` are discarded outright since trivially fast
/// operations (or clock skew) carry no queuing signal.
pub struct WindowedLimit<L: ?Sized> {
    min_window_time: u64,
    max_window_time: u64,
    window_size: usize,
    min_rtt_threshold: u64,
    delegate: Arc<L>,
    inner: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    sample: SampleWindow,
    next_update_time: u64,
}

impl<L: LimitAlgorithm + ?Sized> WindowedLimit<L> {
    pub fn new_with_defaults(delegate: Arc<L>) -> Self {
        Self::new(
            DEFAULT_MIN_WINDOW_TIME,
            DEFAULT_MAX_WINDOW_TIME,
            DEFAULT_WINDOW_SIZE,
            DEFAULT_MIN_RTT_THRESHOLD,
            delegate,
        )
        .expect("default windowed configuration is valid")
    }

    pub fn new(
        min_window_time: Duration,
        max_window_time: Duration,
        window_size: usize,
        min_rtt_threshold: Duration,
        delegate: Arc<L>,
    ) -> Result<Self, ConfigError> {
        if min_window_time < MIN_WINDOW_TIME_FLOOR {
            return Err(ConfigError::WindowTime {
                min: MIN_WINDOW_TIME_FLOOR,
                got: min_window_time,
            });
        }
        if max_window_time < min_window_time {
            return Err(ConfigError::WindowBounds {
                min: min_window_time,
                max: max_window_time,
            });
        }
        if window_size < MIN_WINDOW_SIZE {
            return Err(ConfigError::WindowSize {
                min: MIN_WINDOW_SIZE,
                got: window_size,
            });
        }
        Ok(Self {
            min_window_time: min_window_time.as_nanos() as u64,
            max_window_time: max_window_time.as_nanos() as u64,
            window_size,
            min_rtt_threshold: min_rtt_threshold.as_nanos() as u64,
            delegate,
            inner: Mutex::new(WindowState {
                sample: SampleWindow::new(0),
                next_update_time: 0,
            }),
        })
    }

    fn is_ready(&self, sample: &SampleWindow) -> bool {
        sample.has_samples() && sample.sample_count() > self.window_size
    }
}

impl<L: LimitAlgorithm + ?Sized> LimitAlgorithm for WindowedLimit<L> {
    fn estimated_limit(&self) -> usize {
        self.delegate.estimated_limit()
    }

    fn on_sample(&self, start_time: u64, rtt: u64, in_flight: usize, did_drop: bool) {
        let end_time = start_time + rtt;
        let mut state = self.inner.lock();

        if did_drop {
            state.sample = state.sample.add_dropped_sample(in_flight);
        } else if rtt < self.min_rtt_threshold {
            return;
        } else {
            state.sample = state.sample.add_sample(rtt, in_flight);
        }

        if end_time > state.next_update_time && self.is_ready(&state.sample) {
            let current = state.sample;
            state.sample = SampleWindow::new(end_time);
            state.next_update_time = end_time
                + (current.candidate_rtt() * 2)
                    .clamp(self.min_window_time, self.max_window_time);
            drop(state);

            self.delegate.on_sample(
                current.start_time(),
                current.average_rtt(),
                current.max_in_flight(),
                current.did_drop(),
            );
        }
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.delegate.notify_on_change(listener);
    }
}

impl<L: LimitAlgorithm + ?Sized> fmt::Debug for WindowedLimit<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowedLimit{{delegate={:?}}}", self.delegate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use parking_lot::Mutex as PlMutex;

    use super::*;

    const MS: u64 = 1_000_000;

    /// Records forwarded samples for inspection.
    struct RecordingLimit {
        limit: AtomicUsize,
        samples: PlMutex<Vec<(u64, u64, usize, bool)>>,
    }

    impl RecordingLimit {
        fn new(limit: usize) -> Self {
            Self {
                limit: AtomicUsize::new(limit),
                samples: PlMutex::new(Vec::new()),
            }
        }
    }

    impl fmt::Debug for RecordingLimit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "RecordingLimit")
        }
    }

    impl LimitAlgorithm for RecordingLimit {
        fn estimated_limit(&self) -> usize {
            self.limit.load(Ordering::Acquire)
        }

        fn on_sample(&self, start_time: u64, rtt: u64, in_flight: usize, did_drop: bool) {
            self.samples
                .lock()
                .push((start_time, rtt, in_flight, did_drop));
        }

        fn notify_on_change(&self, _listener: ChangeListener) {}
    }

    fn windowed(delegate: Arc<RecordingLimit>) -> WindowedLimit<RecordingLimit> {
        WindowedLimit::new(
            Duration::from_millis(100),
            Duration::from_millis(100),
            10,
            Duration::from_micros(100),
            delegate,
        )
        .unwrap()
    }

    #[test]
    fn validates_construction_parameters() {
        let delegate: Arc<RecordingLimit> = Arc::new(RecordingLimit::new(10));
        assert!(WindowedLimit::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
            10,
            Duration::ZERO,
            Arc::clone(&delegate),
        )
        .is_err());
        assert!(WindowedLimit::new(
            Duration::from_secs(2),
            Duration::from_secs(1),
            10,
            Duration::ZERO,
            Arc::clone(&delegate),
        )
        .is_err());
        assert!(WindowedLimit::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            5,
            Duration::ZERO,
            delegate,
        )
        .is_err());
    }

    #[test]
    fn forwards_nothing_until_the_window_fills() {
        let delegate = Arc::new(RecordingLimit::new(10));
        let limit = windowed(Arc::clone(&delegate));

        for _ in 0..10 {
            limit.on_sample(0, 5 * MS, 3, false);
        }
        assert!(delegate.samples.lock().is_empty());

        // The 11th sample exceeds window_size and triggers the flush.
        limit.on_sample(0, 5 * MS, 3, false);
        let samples = delegate.samples.lock();
        assert_eq!(samples.len(), 1);
        let (_, rtt, in_flight, did_drop) = samples[0];
        assert_eq!(rtt, 5 * MS);
        assert_eq!(in_flight, 3);
        assert!(!did_drop);
    }

    #[test]
    fn short_samples_are_discarded() {
        let delegate = Arc::new(RecordingLimit::new(10));
        let limit = windowed(Arc::clone(&delegate));

        // Below the 100us threshold; these never count toward the window.
        for _ in 0..50 {
            limit.on_sample(0, 50_000, 3, false);
        }
        assert!(delegate.samples.lock().is_empty());
    }

    #[test]
    fn forwarded_sample_carries_the_window_average_and_drop_flag() {
        let delegate = Arc::new(RecordingLimit::new(10));
        let limit = windowed(Arc::clone(&delegate));

        limit.on_sample(0, 2 * MS, 1, true);
        for _ in 0..10 {
            limit.on_sample(0, 4 * MS, 7, false);
        }
        limit.on_sample(0, 8 * MS, 7, false);

        let samples = delegate.samples.lock();
        assert_eq!(samples.len(), 1);
        let (_, rtt, in_flight, did_drop) = samples[0];
        // 10 samples at 4ms + one at 8ms
        assert_eq!(rtt, (10 * 4 * MS + 8 * MS) / 11);
        assert_eq!(in_flight, 7);
        assert!(did_drop);
    }

    #[test]
    fn respects_the_minimum_window_spacing() {
        let delegate = Arc::new(RecordingLimit::new(10));
        let limit = windowed(Arc::clone(&delegate));

        // Fill and flush one window ending near t=5ms.
        for _ in 0..11 {
            limit.on_sample(0, 5 * MS, 3, false);
        }
        assert_eq!(delegate.samples.lock().len(), 1);

        // A second batch inside the 100ms spacing must stay buffered even
        // though the count is satisfied.
        for _ in 0..20 {
            limit.on_sample(10 * MS, 5 * MS, 3, false);
        }
        assert_eq!(delegate.samples.lock().len(), 1);

        // Past the spacing the buffered window flushes.
        limit.on_sample(200 * MS, 5 * MS, 3, false);
        assert_eq!(delegate.samples.lock().len(), 2);
    }
}
