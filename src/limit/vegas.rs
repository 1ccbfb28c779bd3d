use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::ConfigError;
use crate::metrics::MetricRegistry;
use crate::metrics::MetricSink;
use crate::metrics::NoopMetricRegistry;
use crate::metrics::METRIC_MIN_RTT;

use super::functions;
use super::ChangeListener;
use super::LimitAlgorithm;

type IntFn = Box<dyn Fn(usize) -> usize + Send + Sync>;
type FloatFn = Box<dyn Fn(f64) -> f64 + Send + Sync>;

const DEFAULT_INITIAL_LIMIT: usize = 20;
const DEFAULT_MAX_CONCURRENCY: usize = 1000;
const DEFAULT_SMOOTHING: f64 = 1.0;
const DEFAULT_PROBE_MULTIPLIER: usize = 30;

/// Delay-based limit following TCP Vegas.
///
/// The estimated queue at the protected resource is
/// `limit * (1 - rtt_no_load / rtt)`. The limit grows while the queue stays
/// below alpha and shrinks once it exceeds beta; with the default
/// log10-shaped thresholds that keeps growth stable at higher limits. The
/// no-load RTT baseline is re-probed periodically so it cannot lock in
/// stale values.
pub struct VegasLimit {
    max_limit: usize,
    smoothing: f64,
    probe_multiplier: usize,
    alpha: IntFn,
    beta: IntFn,
    threshold: IntFn,
    increase: FloatFn,
    decrease: FloatFn,
    rtt_sink: Arc<dyn MetricSink>,
    inner: RwLock<State>,
}

struct State {
    estimated_limit: f64,
    rtt_no_load: u64,
    probe_countdown: usize,
    listeners: Vec<ChangeListener>,
}

/// Configures a [`VegasLimit`].
pub struct VegasLimitBuilder {
    initial_limit: usize,
    max_concurrency: usize,
    smoothing: f64,
    probe_multiplier: usize,
    alpha: Option<IntFn>,
    beta: Option<IntFn>,
    threshold: Option<IntFn>,
    increase: Option<FloatFn>,
    decrease: Option<FloatFn>,
    registry: Arc<dyn MetricRegistry>,
}

impl VegasLimitBuilder {
    /// Starting estimate, default 20.
    pub fn initial_limit(mut self, limit: usize) -> Self {
        self.initial_limit = limit.max(1);
        self
    }

    /// Hard upper bound, default 1000.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Blend factor for new versus old estimate, default 1.0 (replace).
    pub fn smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// How many samples (scaled by the limit) between no-load RTT probes,
    /// default 30.
    pub fn probe_multiplier(mut self, multiplier: usize) -> Self {
        self.probe_multiplier = multiplier.max(1);
        self
    }

    pub fn alpha(mut self, f: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.alpha = Some(Box::new(f));
        self
    }

    pub fn beta(mut self, f: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.beta = Some(Box::new(f));
        self
    }

    pub fn threshold(mut self, f: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.threshold = Some(Box::new(f));
        self
    }

    pub fn increase(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.increase = Some(Box::new(f));
        self
    }

    pub fn decrease(mut self, f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.decrease = Some(Box::new(f));
        self
    }

    pub fn registry(mut self, registry: Arc<dyn MetricRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<VegasLimit, ConfigError> {
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(ConfigError::Smoothing(self.smoothing));
        }

        let alpha = self
            .alpha
            .unwrap_or_else(|| Box::new(|limit| 3 * functions::log10_root(0)(limit)));
        let beta = self
            .beta
            .unwrap_or_else(|| Box::new(|limit| 6 * functions::log10_root(0)(limit)));
        let threshold = self
            .threshold
            .unwrap_or_else(|| Box::new(functions::log10_root(0)));
        let increase = self
            .increase
            .unwrap_or_else(|| Box::new(|limit| limit + functions::log10_root_float(0.0)(limit)));
        let decrease = self
            .decrease
            .unwrap_or_else(|| Box::new(|limit| limit - functions::log10_root_float(0.0)(limit)));

        let rtt_sink = self.registry.register_distribution(METRIC_MIN_RTT, &[]);

        Ok(VegasLimit {
            max_limit: self.max_concurrency,
            smoothing: self.smoothing,
            probe_multiplier: self.probe_multiplier,
            alpha,
            beta,
            threshold,
            increase,
            decrease,
            rtt_sink,
            inner: RwLock::new(State {
                estimated_limit: self.initial_limit as f64,
                rtt_no_load: 0,
                probe_countdown: next_probe_countdown(
                    self.probe_multiplier,
                    self.initial_limit as f64,
                ),
                listeners: Vec::new(),
            }),
        })
    }
}

impl VegasLimit {
    pub fn builder() -> VegasLimitBuilder {
        VegasLimitBuilder {
            initial_limit: DEFAULT_INITIAL_LIMIT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            smoothing: DEFAULT_SMOOTHING,
            probe_multiplier: DEFAULT_PROBE_MULTIPLIER,
            alpha: None,
            beta: None,
            threshold: None,
            increase: None,
            decrease: None,
            registry: Arc::new(NoopMetricRegistry),
        }
    }

    pub fn new_with_defaults() -> Self {
        Self::builder()
            .build()
            .expect("default Vegas configuration is valid")
    }

    /// The current no-load RTT baseline in nanoseconds, 0 before the first
    /// sample.
    pub fn rtt_no_load(&self) -> u64 {
        self.inner.read().rtt_no_load
    }

    fn update_estimate(&self, state: &mut State, rtt: u64, in_flight: usize, did_drop: bool) {
        let estimated = state.estimated_limit;
        let queue_size =
            (estimated * (1.0 - state.rtt_no_load as f64 / rtt as f64)).ceil() as usize;

        // Any drop needs to reduce the limit
        let new_limit = if did_drop {
            (self.decrease)(estimated)
        } else if ((in_flight * 2) as f64) < estimated {
            // Prevent upward drift while not close to the limit
            return;
        } else {
            let alpha = (self.alpha)(estimated as usize);
            let beta = (self.beta)(estimated as usize);
            let threshold = (self.threshold)(estimated as usize);

            if queue_size < threshold {
                // Aggressive increase while there is no queuing at all
                estimated + beta as f64
            } else if queue_size < alpha {
                (self.increase)(estimated)
            } else if queue_size > beta {
                (self.decrease)(estimated)
            } else {
                // Within the sweet spot
                return;
            }
        };

        let new_limit = new_limit.clamp(1.0, self.max_limit as f64);
        let new_limit = (1.0 - self.smoothing) * estimated + self.smoothing * new_limit;

        if new_limit as usize != estimated as usize {
            tracing::debug!(
                limit = new_limit as usize,
                min_rtt_ms = state.rtt_no_load / 1_000_000,
                win_rtt_ms = rtt / 1_000_000,
                queue_size,
                "vegas limit updated"
            );
        }

        state.estimated_limit = new_limit;
        let limit = new_limit as usize;
        for listener in &state.listeners {
            listener(limit);
        }
    }
}

impl LimitAlgorithm for VegasLimit {
    fn estimated_limit(&self) -> usize {
        self.inner.read().estimated_limit as usize
    }

    fn on_sample(&self, _start_time: u64, rtt: u64, in_flight: usize, did_drop: bool) {
        if rtt == 0 {
            // A zero RTT carries no load information and would zero the
            // queue-size denominator.
            return;
        }
        let mut state = self.inner.write();

        state.probe_countdown = state.probe_countdown.saturating_sub(1);
        if state.probe_countdown == 0 {
            tracing::debug!(rtt_ms = rtt / 1_000_000, "probing a fresh no-load rtt");
            state.probe_countdown =
                next_probe_countdown(self.probe_multiplier, state.estimated_limit);
            state.rtt_no_load = rtt;
            return;
        }

        if state.rtt_no_load == 0 || rtt < state.rtt_no_load {
            tracing::debug!(rtt_ms = rtt / 1_000_000, "new minimum rtt");
            state.rtt_no_load = rtt;
            return;
        }

        self.rtt_sink.add_sample(state.rtt_no_load as f64, &[]);
        self.update_estimate(&mut state, rtt, in_flight, did_drop);
    }

    fn notify_on_change(&self, listener: ChangeListener) {
        self.inner.write().listeners.push(listener);
    }
}

impl fmt::Debug for VegasLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        write!(
            f,
            "VegasLimit{{limit={}, rtt_no_load={} ms}}",
            state.estimated_limit as usize,
            state.rtt_no_load / 1_000_000
        )
    }
}

/// Roughly `[multiplier * limit / 2, multiplier * limit)` samples until the
/// next probe.
fn next_probe_countdown(probe_multiplier: usize, estimated_limit: f64) -> usize {
    let half = ((probe_multiplier as f64 * estimated_limit) as usize / 2).max(1);
    rand::rng().random_range(half..half * 2 + 1)
}
