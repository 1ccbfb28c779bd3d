use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use quanta::Clock;
use quanta::Instant;

use crate::context::Context;
use crate::error::ConfigError;
use crate::limit::LimitAlgorithm;
use crate::measurements::SampleWindow;
use crate::metrics::MetricRegistry;
use crate::metrics::METRIC_IN_FLIGHT;
use crate::metrics::METRIC_LIMIT;
use crate::strategy::Strategy;
use crate::strategy::Token;

use super::Limiter;
use super::Listener;

const MIN_WINDOW_TIME_FLOOR: Duration = Duration::from_millis(100);
const MIN_WINDOW_SIZE: usize = 10;

/// Sampling window parameters for [`DefaultLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Lower bound on the time between estimator updates. Default 1 s.
    pub min_window_time: Duration,
    /// Upper bound on the time between estimator updates. Default 1 s.
    pub max_window_time: Duration,
    /// Samples faster than this are discarded as carrying no queuing
    /// signal. Default 100 µs.
    pub min_rtt_threshold: Duration,
    /// Minimum samples before a window may close. Default 100.
    pub window_size: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_window_time: Duration::from_secs(1),
            max_window_time: Duration::from_secs(1),
            min_rtt_threshold: Duration::from_micros(100),
            window_size: 100,
        }
    }
}

/// Limiter combining a pluggable limit estimator with an enforcement
/// strategy.
///
/// Successful operations fold their RTT into the current sample window;
/// when the window has enough samples and enough time has passed, it is
/// closed, the aggregate is fed to the estimator, and the strategy receives
/// the new limit. Exactly one thread performs any given rollover.
pub struct DefaultLimiter<L: ?Sized, S: ?Sized> {
    inner: Arc<Inner<L, S>>,
}

struct Inner<L: ?Sized, S: ?Sized> {
    limit: Arc<L>,
    strategy: Arc<S>,
    min_window_time: u64,
    max_window_time: u64,
    min_rtt_threshold: u64,
    window_size: usize,
    in_flight: AtomicUsize,
    window: Mutex<WindowState>,
    clock: Clock,
    anchor: Instant,
}

#[derive(Debug)]
struct WindowState {
    sample: SampleWindow,
    next_update_time: u64,
}

impl<L, S> DefaultLimiter<L, S>
where
    L: LimitAlgorithm + ?Sized + 'static,
    S: Strategy + ?Sized + 'static,
{
    pub fn new(limit: Arc<L>, strategy: Arc<S>) -> Self {
        Self::with_config(limit, strategy, LimiterConfig::default())
            .expect("default limiter configuration is valid")
    }

    pub fn with_config(
        limit: Arc<L>,
        strategy: Arc<S>,
        config: LimiterConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(limit, strategy, config, Clock::new())
    }

    /// Construction with an explicit clock, for deterministic tests.
    pub fn with_clock(
        limit: Arc<L>,
        strategy: Arc<S>,
        config: LimiterConfig,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        if config.min_window_time < MIN_WINDOW_TIME_FLOOR {
            return Err(ConfigError::WindowTime {
                min: MIN_WINDOW_TIME_FLOOR,
                got: config.min_window_time,
            });
        }
        if config.max_window_time < config.min_window_time {
            return Err(ConfigError::WindowBounds {
                min: config.min_window_time,
                max: config.max_window_time,
            });
        }
        if config.window_size < MIN_WINDOW_SIZE {
            return Err(ConfigError::WindowSize {
                min: MIN_WINDOW_SIZE,
                got: config.window_size,
            });
        }

        strategy.set_limit(limit.estimated_limit());
        let anchor = clock.now();
        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                strategy,
                min_window_time: config.min_window_time.as_nanos() as u64,
                max_window_time: config.max_window_time.as_nanos() as u64,
                min_rtt_threshold: config.min_rtt_threshold.as_nanos() as u64,
                window_size: config.window_size,
                in_flight: AtomicUsize::new(0),
                window: Mutex::new(WindowState {
                    sample: SampleWindow::new(0),
                    next_update_time: 0,
                }),
                clock,
                anchor,
            }),
        })
    }

    /// Register `limit` and `inflight` gauges with a metric registry. The
    /// suppliers hold weak references, so the registry never keeps a
    /// dismantled limiter alive.
    pub fn register_metrics(&self, registry: &dyn MetricRegistry) {
        let inner = Arc::downgrade(&self.inner);
        registry.register_gauge(
            METRIC_LIMIT,
            Box::new(move || {
                Weak::upgrade(&inner).map(|inner| inner.limit.estimated_limit() as f64)
            }),
            &[],
        );
        let inner = Arc::downgrade(&self.inner);
        registry.register_gauge(
            METRIC_IN_FLIGHT,
            Box::new(move || {
                Weak::upgrade(&inner).map(|inner| inner.in_flight.load(Ordering::Acquire) as f64)
            }),
            &[],
        );
    }

    /// The estimator's current limit.
    pub fn estimated_limit(&self) -> usize {
        self.inner.limit.estimated_limit()
    }

    /// Operations admitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }
}

impl<L: ?Sized, S: ?Sized> Inner<L, S> {
    fn now(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }

    fn is_ready(&self, sample: &SampleWindow) -> bool {
        sample.has_samples() && sample.sample_count() > self.window_size
    }
}

impl<L, S> Inner<L, S>
where
    L: LimitAlgorithm + ?Sized,
    S: Strategy + ?Sized,
{
    fn record_success(&self, end_time: u64, rtt: u64, in_flight: usize) {
        let mut state = self.window.lock();
        state.sample = state.sample.add_sample(rtt, in_flight);

        // The lock serializes the check and the swap, so only one thread
        // can observe a closable window.
        if end_time > state.next_update_time && self.is_ready(&state.sample) {
            let current = state.sample;
            state.sample = SampleWindow::new(end_time);
            state.next_update_time = end_time
                + (current.candidate_rtt() * 2)
                    .clamp(self.min_window_time, self.max_window_time);
            drop(state);

            self.limit.on_sample(
                current.start_time(),
                current.average_rtt(),
                current.max_in_flight(),
                current.did_drop(),
            );
            self.strategy.set_limit(self.limit.estimated_limit());
        }
    }

    fn record_drop(&self, in_flight: usize) {
        let mut state = self.window.lock();
        state.sample = state.sample.add_dropped_sample(in_flight);
    }
}

impl<L, S> Limiter for DefaultLimiter<L, S>
where
    L: LimitAlgorithm + ?Sized + 'static,
    S: Strategy + ?Sized + 'static,
{
    fn acquire(&self, ctx: &Context) -> Option<Box<dyn Listener>> {
        let token = match self.inner.strategy.try_acquire(ctx) {
            ControlFlow::Continue(token) => token,
            ControlFlow::Break(_) => return None,
        };

        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        Some(Box::new(DefaultListener {
            inner: Arc::clone(&self.inner),
            token,
            start_time: self.inner.now(),
            in_flight,
        }))
    }
}

impl<L, S> fmt::Debug for DefaultLimiter<L, S>
where
    L: LimitAlgorithm + ?Sized,
    S: Strategy + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DefaultLimiter{{limit={:?}, strategy={:?}, in_flight={}}}",
            self.inner.limit,
            self.inner.strategy,
            self.inner.in_flight.load(Ordering::Acquire)
        )
    }
}

struct DefaultListener<L: ?Sized, S: ?Sized> {
    inner: Arc<Inner<L, S>>,
    token: Token,
    start_time: u64,
    in_flight: usize,
}

impl<L, S> Listener for DefaultListener<L, S>
where
    L: LimitAlgorithm + ?Sized + 'static,
    S: Strategy + ?Sized + 'static,
{
    fn on_success(self: Box<Self>) {
        let this = *self;
        let end_time = this.inner.now();
        this.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        this.token.release();

        let rtt = end_time.saturating_sub(this.start_time);
        if rtt < this.inner.min_rtt_threshold {
            return;
        }
        this.inner.record_success(end_time, rtt, this.in_flight);
    }

    fn on_ignore(self: Box<Self>) {
        let this = *self;
        this.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        this.token.release();
    }

    fn on_dropped(self: Box<Self>) {
        let this = *self;
        this.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        this.token.release();
        this.inner.record_drop(this.in_flight);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex as PlMutex;

    use crate::limit::ChangeListener;
    use crate::strategy::SimpleStrategy;

    use super::*;

    const MS: u64 = 1_000_000;

    /// Estimator whose limit grows by one per forwarded window, so tests can
    /// observe rollovers through the strategy.
    struct CountingLimit {
        limit: AtomicUsize,
        samples: PlMutex<Vec<(u64, u64, usize, bool)>>,
    }

    impl CountingLimit {
        fn new(limit: usize) -> Self {
            Self {
                limit: AtomicUsize::new(limit),
                samples: PlMutex::new(Vec::new()),
            }
        }
    }

    impl fmt::Debug for CountingLimit {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "CountingLimit")
        }
    }

    impl LimitAlgorithm for CountingLimit {
        fn estimated_limit(&self) -> usize {
            self.limit.load(Ordering::Acquire)
        }

        fn on_sample(&self, start_time: u64, rtt: u64, in_flight: usize, did_drop: bool) {
            self.samples
                .lock()
                .push((start_time, rtt, in_flight, did_drop));
            self.limit.fetch_add(1, Ordering::SeqCst);
        }

        fn notify_on_change(&self, _listener: ChangeListener) {}
    }

    fn test_config() -> LimiterConfig {
        LimiterConfig {
            min_window_time: Duration::from_millis(100),
            max_window_time: Duration::from_secs(1),
            min_rtt_threshold: Duration::from_micros(100),
            window_size: 10,
        }
    }

    fn mock_limiter(
        estimator_limit: usize,
        strategy_limit: usize,
    ) -> (
        DefaultLimiter<CountingLimit, SimpleStrategy>,
        Arc<CountingLimit>,
        Arc<SimpleStrategy>,
        Arc<quanta::Mock>,
    ) {
        let limit = Arc::new(CountingLimit::new(estimator_limit));
        let strategy = Arc::new(SimpleStrategy::new(strategy_limit));
        let (clock, mock) = Clock::mock();
        let limiter = DefaultLimiter::with_clock(
            Arc::clone(&limit),
            Arc::clone(&strategy),
            test_config(),
            clock,
        )
        .unwrap();
        (limiter, limit, strategy, mock)
    }

    #[test]
    fn validates_window_configuration() {
        let limit = Arc::new(CountingLimit::new(10));
        let strategy = Arc::new(SimpleStrategy::new(10));

        let mut config = test_config();
        config.min_window_time = Duration::from_millis(10);
        assert!(DefaultLimiter::with_config(
            Arc::clone(&limit),
            Arc::clone(&strategy),
            config
        )
        .is_err());

        let mut config = test_config();
        config.max_window_time = Duration::from_millis(50);
        assert!(DefaultLimiter::with_config(
            Arc::clone(&limit),
            Arc::clone(&strategy),
            config
        )
        .is_err());

        let mut config = test_config();
        config.window_size = 5;
        assert!(DefaultLimiter::with_config(limit, strategy, config).is_err());
    }

    #[test]
    fn construction_pushes_the_initial_limit_into_the_strategy() {
        let (_limiter, _limit, strategy, _mock) = mock_limiter(42, 1);
        assert_eq!(strategy.limit(), 42);
    }

    #[test]
    fn acquire_and_success_balance_in_flight() {
        let (limiter, _limit, strategy, mock) = mock_limiter(10, 10);

        let listener = limiter.acquire(&Context::new()).unwrap();
        assert_eq!(limiter.in_flight(), 1);
        assert_eq!(strategy.busy_count(), 1);

        mock.increment(Duration::from_millis(5));
        listener.on_success();
        assert_eq!(limiter.in_flight(), 0);
        assert_eq!(strategy.busy_count(), 0);
    }

    #[test]
    fn rejects_when_the_strategy_is_full() {
        let (limiter, _limit, _strategy, _mock) = mock_limiter(1, 1);
        let _held = limiter.acquire(&Context::new()).unwrap();
        assert!(limiter.acquire(&Context::new()).is_none());
    }

    #[test]
    fn window_rollover_updates_estimator_and_strategy() {
        let (limiter, limit, strategy, mock) = mock_limiter(10, 10);

        // Ten samples are not enough: window_size must be exceeded.
        for _ in 0..10 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_millis(5));
            listener.on_success();
        }
        assert!(limit.samples.lock().is_empty());

        let listener = limiter.acquire(&Context::new()).unwrap();
        mock.increment(Duration::from_millis(5));
        listener.on_success();

        let samples = limit.samples.lock();
        assert_eq!(samples.len(), 1);
        let (_, rtt, max_in_flight, did_drop) = samples[0];
        assert_eq!(rtt, 5 * MS);
        assert_eq!(max_in_flight, 1);
        assert!(!did_drop);
        drop(samples);

        // The estimator bumped its limit by one; the strategy saw it.
        assert_eq!(strategy.limit(), 11);
    }

    #[test]
    fn rollovers_respect_the_minimum_window_spacing() {
        let (limiter, limit, _strategy, mock) = mock_limiter(10, 10);

        for _ in 0..11 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_millis(5));
            listener.on_success();
        }
        assert_eq!(limit.samples.lock().len(), 1);

        // Another full window's worth of samples arrives before
        // min_window_time has elapsed; it must stay buffered.
        for _ in 0..11 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_millis(1));
            listener.on_success();
        }
        assert_eq!(limit.samples.lock().len(), 1);

        // Once the spacing has passed, the next success closes the window.
        mock.increment(Duration::from_millis(200));
        let listener = limiter.acquire(&Context::new()).unwrap();
        mock.increment(Duration::from_millis(5));
        listener.on_success();
        assert_eq!(limit.samples.lock().len(), 2);
    }

    #[test]
    fn fast_samples_are_discarded() {
        let (limiter, limit, _strategy, mock) = mock_limiter(10, 10);

        for _ in 0..50 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_micros(10));
            listener.on_success();
        }
        assert!(limit.samples.lock().is_empty());
    }

    #[test]
    fn ignored_operations_record_nothing() {
        let (limiter, limit, _strategy, mock) = mock_limiter(10, 10);

        for _ in 0..50 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_millis(5));
            listener.on_ignore();
        }
        assert!(limit.samples.lock().is_empty());
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn registered_gauges_report_limit_and_in_flight() {
        use crate::metrics::GaugeSupplier;
        use crate::metrics::MetricRegistry;
        use crate::metrics::MetricSink;
        use crate::metrics::NoopMetricSink;

        #[derive(Default)]
        struct GaugeRegistry {
            gauges: PlMutex<Vec<(String, GaugeSupplier)>>,
        }

        impl MetricRegistry for GaugeRegistry {
            fn register_distribution(
                &self,
                _id: &str,
                _tags: &[(&str, &str)],
            ) -> Arc<dyn MetricSink> {
                Arc::new(NoopMetricSink)
            }

            fn register_timing(&self, _id: &str, _tags: &[(&str, &str)]) -> Arc<dyn MetricSink> {
                Arc::new(NoopMetricSink)
            }

            fn register_count(&self, _id: &str, _tags: &[(&str, &str)]) -> Arc<dyn MetricSink> {
                Arc::new(NoopMetricSink)
            }

            fn register_gauge(&self, id: &str, supplier: GaugeSupplier, _tags: &[(&str, &str)]) {
                self.gauges.lock().push((id.to_string(), supplier));
            }

            fn start(&self) {}

            fn stop(&self) {}
        }

        let (limiter, _limit, _strategy, _mock) = mock_limiter(7, 7);
        let registry = GaugeRegistry::default();
        limiter.register_metrics(&registry);

        let _held = limiter.acquire(&Context::new()).unwrap();
        let gauges = registry.gauges.lock();
        let read = |name: &str| {
            gauges
                .iter()
                .find(|(id, _)| id == name)
                .map(|(_, supplier)| supplier())
                .expect("gauge registered")
        };
        assert_eq!(read(METRIC_LIMIT), Some(7.0));
        assert_eq!(read(METRIC_IN_FLIGHT), Some(1.0));
    }

    #[test]
    fn drops_mark_the_window() {
        let (limiter, limit, _strategy, mock) = mock_limiter(10, 10);

        let listener = limiter.acquire(&Context::new()).unwrap();
        mock.increment(Duration::from_millis(5));
        listener.on_dropped();

        for _ in 0..11 {
            let listener = limiter.acquire(&Context::new()).unwrap();
            mock.increment(Duration::from_millis(5));
            listener.on_success();
        }

        let samples = limit.samples.lock();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].3, "window should carry the drop flag");
    }
}
