//! Limit estimators.
//!
//! An estimator consumes RTT/in-flight/drop samples and maintains an integer
//! concurrency limit. Loss-based algorithms (AIMD) react to drops,
//! delay-based algorithms (Vegas, Gradient2) react to queuing inferred from
//! RTT inflation.

use std::fmt::Debug;

pub mod functions;

mod aimd;
mod fixed;
mod gradient2;
mod settable;
mod traced;
mod vegas;
mod windowed;

pub use aimd::AimdLimit;
pub use fixed::FixedLimit;
pub use gradient2::Gradient2Limit;
pub use gradient2::Gradient2LimitBuilder;
pub use settable::SettableLimit;
pub use traced::TracedLimit;
pub use vegas::VegasLimit;
pub use vegas::VegasLimitBuilder;
pub use windowed::WindowedLimit;

/// Callback invoked with the new limit whenever an estimator changes it.
///
/// Callbacks run under the estimator's lock and must not call back into the
/// estimator.
pub type ChangeListener = Box<dyn Fn(usize) + Send + Sync>;

/// An algorithm that estimates a concurrency limit from RTT measurements.
pub trait LimitAlgorithm: Debug + Send + Sync {
    /// The current estimated limit.
    fn estimated_limit(&self) -> usize;

    /// Update the limit with a new sample.
    ///
    /// `start_time` and `rtt` are in nanoseconds; `in_flight` is the number
    /// of concurrent operations observed with the sample; `did_drop` marks
    /// a sample that was rejected or timed out downstream.
    fn on_sample(&self, start_time: u64, rtt: u64, in_flight: usize, did_drop: bool);

    /// Register a callback invoked whenever the limit changes.
    fn notify_on_change(&self, listener: ChangeListener);
}
