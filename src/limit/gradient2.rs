use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConfigError;
use crate::measurements::ExponentialAverageMeasurement;
use crate::measurements::Measurement;
use crate::metrics::MetricRegistry;
use crate::metrics::MetricSink;
use crate::metrics::NoopMetricRegistry;
use crate::metrics::METRIC_LONG_RTT;
use crate::metrics::METRIC_QUEUE_SIZE;
use crate::metrics::METRIC_SHORT_RTT;

use super::functions;
use super::ChangeListener;
use super::LimitAlgorithm;

type IntFn = Box<dyn Fn(usize) -> usize + Send + Sync>;

const DEFAULT_INITIAL_LIMIT: usize = 4;
const DEFAULT_MIN_LIMIT: usize = 4;
const DEFAULT_MAX_CONCURRENCY: usize = 1000;
const DEFAULT_QUEUE_SIZE: usize = 4;
const DEFAULT_SMOOTHING: f64 = 0.2;
const DEFAULT_SHORT_WINDOW: usize = 10;
const DEFAULT_LONG_WINDOW: usize = 100;
const DEFAULT_DRIFT_MULTIPLIER: f64 = 5.0;
const WARMUP_SAMPLES: usize = 10;

/// Delay-based limit comparing a short-window RTT against a long-window
/// baseline RTT.
///
/// The gradient `long / short` shrinks as current latency inflates over the
/// baseline and scales the limit accordingly. When the short RTT stays above
/// the long RTT for a sustained stretch both trend upward together and hide
/// queuing; the drift guard then resets the baseline and drops the limit to
/// probe for better latency.
pub struct Gradient2Limit {
    min_limit: usize,
    max_limit: usize,
    smoothing: f64,
    queue_size: IntFn,
    max_drift_intervals: usize,
    short_sink: Arc<dyn MetricSink>,
    long_sink: Arc<dyn MetricSink>,
    queue_sink: Arc<dyn MetricSink>,
    inner: Mutex<State>,
}

struct State {
    estimated_limit: f64,
    short_rtt: ExponentialAverageMeasurement,
    long_rtt: ExponentialAverageMeasurement,
    intervals_above: usize,
    listeners: Vec<ChangeListener>,
}

/// Configures a [`Gradient2Limit`].
pub struct Gradient2LimitBuilder {
    initial_limit: usize,
    min_limit: usize,
    max_concurrency: usize,
    queue_size: Option<IntFn>,
    smoothing: f64,
    short_window: usize,
    long_window: usize,
    drift_multiplier: f64,
    registry: Arc<dyn MetricRegistry>,
}

impl Gradient2LimitBuilder {
    /// Starting estimate, default 4.
    pub fn initial_limit(mut self, limit: usize) -> Self {
        self.initial_limit = limit.max(1);
        self
    }

    /// Hard lower bound, default 4.
    pub fn min_limit(mut self, min: usize) -> Self {
        self.min_limit = min;
        self
    }

    /// Hard upper bound, default 1000.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Queue headroom added on top of the gradient-scaled limit, as a
    /// function of the current limit. Default: constant 4.
    pub fn queue_size(mut self, f: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.queue_size = Some(Box::new(f));
        self
    }

    /// Blend factor applied when the limit is shrinking, default 0.2.
    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Short RTT moving-average window, default 10 samples.
    pub fn short_window(mut self, window: usize) -> Self {
        self.short_window = window.max(1);
        self
    }

    /// Long RTT moving-average window, default 100 samples.
    pub fn long_window(mut self, window: usize) -> Self {
        self.long_window = window.max(1);
        self
    }

    /// Multiple of the short window tolerated with short RTT above long RTT
    /// before the baseline is reset, default 5.0.
    pub fn drift_multiplier(mut self, multiplier: f64) -> Self {
        self.drift_multiplier = multiplier;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn MetricRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<Gradient2Limit, ConfigError> {
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(ConfigError::Smoothing(self.smoothing));
        }
        if self.min_limit > self.max_concurrency {
            return Err(ConfigError::LimitBounds {
                min: self.min_limit,
                max: self.max_concurrency,
            });
        }

        let queue_size = self
            .queue_size
            .unwrap_or_else(|| Box::new(functions::fixed(DEFAULT_QUEUE_SIZE)));

        Ok(Gradient2Limit {
            min_limit: self.min_limit,
            max_limit: self.max_concurrency,
            smoothing: self.smoothing,
            queue_size,
            max_drift_intervals: (self.short_window as f64 * self.drift_multiplier) as usize,
            short_sink: self.registry.register_distribution(METRIC_SHORT_RTT, &[]),
            long_sink: self.registry.register_distribution(METRIC_LONG_RTT, &[]),
            queue_sink: self.registry.register_distribution(METRIC_QUEUE_SIZE, &[]),
            inner: Mutex::new(State {
                estimated_limit: self.initial_limit as f64,
                short_rtt: ExponentialAverageMeasurement::new(self.short_window, WARMUP_SAMPLES),
                long_rtt: ExponentialAverageMeasurement::new(self.long_window, WARMUP_SAMPLES),
                intervals_above: 0,
                listeners: Vec::new(),
            }),
        })
    }
}

impl Gradient2Limit {
    pub fn builder() -> Gradient2LimitBuilder {
        Gradient2LimitBuilder {
            initial_limit: DEFAULT_INITIAL_LIMIT,
            min_limit: DEFAULT_MIN_LIMIT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_size: None,
            smoothing: DEFAULT_SMOOTHING,
            short_window: DEFAULT_SHORT_WINDOW,
            long_window: DEFAULT_LONG_WINDOW,
            drift_multiplier: DEFAULT_DRIFT_MULTIPLIER,
            registry: Arc::new(NoopMetricRegistry),
        }
    }

    pub fn new_with_defaults() -> Self {
        Self::builder()
            .build()
            .expect("default Gradient2 configuration is valid")
    }
}

impl LimitAlgorithm for Gradient2Limit {
    fn estimated_limit(&self) -> usize {
        self.inner.lock().estimated_limit as usize
    }

    fn on_sample(&self, _start_time: u64, rtt: u64, in_flight: usize, _did_drop: bool) {
        let mut state = self.inner.lock();

        let queue_size = (self.queue_size)(state.estimated_limit as usize);
        let (short_rtt, _) = state.short_rtt.add(rtt as f64);
        let (long_rtt, _) = state.long_rtt.add(rtt as f64);

        // Under steady state the short and long RTT whipsaw around each
        // other. A long stretch without a crossover means both are trending
        // up together and the limit is slowly feeding a queue; reset the
        // baseline and drop the limit to probe for lower latency.
        if short_rtt > long_rtt {
            state.intervals_above += 1;
            if state.intervals_above > self.max_drift_intervals {
                state.intervals_above = 0;
                let new_limit = queue_size.max(self.min_limit);
                state.long_rtt.reset();
                state.estimated_limit = new_limit as f64;
                tracing::debug!(limit = new_limit, "long term drift detected, probing");
                for listener in &state.listeners {
                    listener(new_limit);
                }
                return;
            }
        } else {
            state.intervals_above = 0;
        }

        self.short_sink.add_sample(short_rtt, &[]);
        self.long_sink.add_sample(long_rtt, &[]);
        self.queue_sink.add_sample(queue_size as f64, &[]);

        if short_rtt == 0.0 {
            return;
        }

        // The long RTT can exceed the short one because baseline updates are
        // smoothed; cap at 1.0 to mean "no queuing" and never shed more than
        // half on a single outlier.
        let gradient = (long_rtt / short_rtt).clamp(0.5, 1.0);

        // Don't grow the limit when app limited
        if (in_flight as f64) < state.estimated_limit / 2.0 {
            return;
        }

        let mut new_limit = state.estimated_limit * gradient + queue_size as f64;
        if new_limit < state.estimated_limit {
            new_limit = (self.min_limit as f64)
                .max(state.estimated_limit + (1.0 - self.smoothing) + self.smoothing * new_limit);
        }
        new_limit = new_limit.clamp(queue_size as f64, self.max_limit as f64);

        if new_limit != state.estimated_limit {
            tracing::debug!(
                limit = new_limit as usize,
                short_rtt_ms = short_rtt / 1e6,
                long_rtt_ms = long_rtt / 1e6,
                queue_size,
                gradient,
                "gradient2 limit updated"
            );
        }

        state.estimated_limit = new_limit;
        let limit = new_limit as usize;
        for listener in &state.listeners {
            listener(limit);
        }
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.inner.lock().listeners.push(listener);
    }
}

impl fmt::Debug for Gradient2Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Gradient2Limit{{limit={}}}",
            self.inner.lock().estimated_limit as usize
        )
    }
}
