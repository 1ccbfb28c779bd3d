//! Aggregation primitives that feed the limit estimators.
//!
//! Each measurement tracks one statistic over a stream of samples. Callers
//! own the synchronization (estimators hold their measurements behind their
//! own lock), so the types here are plain mutable state.

mod exponential_average;
mod maximum;
mod minimum;
mod moving_variance;
mod simple_exponential;
mod single;
mod window;
mod windowless_percentile;

pub use exponential_average::ExponentialAverageMeasurement;
pub use maximum::MaximumMeasurement;
pub use minimum::MinimumMeasurement;
pub use moving_variance::SimpleMovingVariance;
pub use simple_exponential::SimpleExponentialMovingAverage;
pub use single::SingleMeasurement;
pub use window::SampleWindow;
pub use windowless_percentile::WindowlessMovingPercentile;

/// A statistic over a stream of samples, such as a minimum or a moving
/// average.
pub trait Measurement {
    /// Add a single sample. Returns the new value and whether the internal
    /// state changed.
    fn add(&mut self, value: f64) -> (f64, bool);

    /// The current value.
    fn get(&self) -> f64;

    /// Reset to the state before any sample was added.
    fn reset(&mut self);

    /// Apply an operation to the current value. Implementations with
    /// derived state (minimum, maximum, percentile) route the result back
    /// through their own accumulation rules.
    fn update(&mut self, op: &dyn Fn(f64) -> f64);
}
