//! Pluggable metric reporting interfaces.
//!
//! Limiters and estimators report samples and expose gauges through these
//! traits; backends are supplied by the caller. The no-op implementations
//! are always available and are the default everywhere.

use std::sync::Arc;

/// Metric id for the current limit gauge.
pub const METRIC_LIMIT: &str = "limit";
/// Metric id for the current in-flight gauge.
pub const METRIC_IN_FLIGHT: &str = "inflight";
/// Metric id for a partition's limit gauge.
pub const METRIC_PARTITION_LIMIT: &str = "limit.partition";
/// Metric id for the minimum round-trip time distribution.
pub const METRIC_MIN_RTT: &str = "min_rtt";
/// Metric id for the short-window RTT distribution.
pub const METRIC_SHORT_RTT: &str = "short_rtt";
/// Metric id for the long-window RTT distribution.
pub const METRIC_LONG_RTT: &str = "long_rtt";
/// Metric id for the estimated queue size distribution.
pub const METRIC_QUEUE_SIZE: &str = "queue_size";
/// Metric tag carrying the partition identifier.
pub const PARTITION_TAG: &str = "partition";

/// Push-style receiver for distribution, timing and count samples.
pub trait MetricSink: Send + Sync {
    fn add_sample(&self, value: f64, tags: &[(&str, &str)]);
}

/// Polled gauge supplier. Returning `None` skips the flush.
pub type GaugeSupplier = Box<dyn Fn() -> Option<f64> + Send + Sync>;

/// Registry for the metrics a limiter emits.
///
/// Distributions, timings and counts are push-style through the returned
/// sink; gauges are polled by the registry at its own cadence between
/// `start` and `stop`.
pub trait MetricRegistry: Send + Sync {
    fn register_distribution(&self, id: &str, tags: &[(&str, &str)]) -> Arc<dyn MetricSink>;
    fn register_timing(&self, id: &str, tags: &[(&str, &str)]) -> Arc<dyn MetricSink>;
    fn register_count(&self, id: &str, tags: &[(&str, &str)]) -> Arc<dyn MetricSink>;
    fn register_gauge(&self, id: &str, supplier: GaugeSupplier, tags: &[(&str, &str)]);
    fn start(&self);
    fn stop(&self);
}

/// Sink that discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricSink;

impl MetricSink for NoopMetricSink {
    fn add_sample(&self, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Registry that discards everything. Stateless; limiters built without an
/// explicit registry use this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricRegistry;

impl MetricRegistry for NoopMetricRegistry {
    fn register_distribution(&self, _id: &str, _tags: &[(&str, &str)]) -> Arc<dyn MetricSink> {
        Arc::new(NoopMetricSink)
    }

    fn register_timing(&self, _id: &str, _tags: &[(&str, &str)]) -> Arc<dyn MetricSink> {
        Arc::new(NoopMetricSink)
    }

    fn register_count(&self, _id: &str, _tags: &[(&str, &str)]) -> Arc<dyn MetricSink> {
        Arc::new(NoopMetricSink)
    }

    fn register_gauge(&self, _id: &str, _supplier: GaugeSupplier, _tags: &[(&str, &str)]) {}

    fn start(&self) {}

    fn stop(&self) {}
}
