//! Limiter facades and queueing wrappers.
//!
//! [`DefaultLimiter`] orchestrates sampling, window rollover, estimator
//! updates and strategy gating. The blocking wrappers add waiting behavior
//! on top of any inner limiter.

use crate::context::Context;

mod blocking;
mod default;
mod queue_blocking;

pub use blocking::BlockingLimiter;
pub use default::DefaultLimiter;
pub use default::LimiterConfig;
pub use queue_blocking::QueueBlockingLimiter;
pub use queue_blocking::QueueLimiterConfig;
pub use queue_blocking::QueueOrdering;

/// Completion callback for one admitted operation.
///
/// Exactly one of the three methods must be invoked; they consume the
/// listener, so calling a second one is a compile error rather than a
/// runtime bug. All three release the underlying strategy token.
pub trait Listener: Send {
    /// The operation succeeded; its latency becomes an RTT sample.
    fn on_success(self: Box<Self>);

    /// The operation failed before it could produce a meaningful RTT
    /// (e.g. connection refused). Nothing is recorded.
    fn on_ignore(self: Box<Self>);

    /// The operation was rejected or timed out downstream. Loss-based
    /// estimators treat this as a congestion signal.
    fn on_dropped(self: Box<Self>);
}

/// The request-facing contract of every limiter.
///
/// Callers acquire before each operation and must complete the returned
/// [`Listener`] when the operation finishes. `None` means the limit has been
/// exceeded (or, for blocking wrappers, that waiting timed out or the
/// context was cancelled).
pub trait Limiter: Send + Sync {
    fn acquire(&self, ctx: &Context) -> Option<Box<dyn Listener>>;
}
