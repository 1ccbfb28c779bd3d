//! # surge-limit
//!
//! `surge-limit` is an adaptive in-process concurrency limiter. Instead of
//! bounding requests per unit time, it bounds the number of concurrently
//! in-flight operations and continuously re-estimates that bound from
//! observed round-trip times and drop events, using TCP-congestion-control
//! style algorithms (AIMD, Vegas, Gradient2).
//!
//! ## Core Concepts
//!
//! * **Limit algorithm**: consumes RTT/in-flight/drop samples and produces
//!   an updated integer limit ([`limit::LimitAlgorithm`]).
//! * **Strategy**: atomically accounts in-flight operations against the
//!   current limit ([`strategy::Strategy`]), including partitioned variants.
//! * **Limiter**: the request-facing facade. `acquire` either admits the
//!   operation and returns a [`Listener`], or rejects it.
//! * **Listener**: completes the operation with exactly one of
//!   `on_success`, `on_ignore` or `on_dropped`, releasing the slot and
//!   feeding the sample back to the estimator.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use surge_limit::limit::VegasLimit;
//! use surge_limit::limiter::DefaultLimiter;
//! use surge_limit::strategy::SimpleStrategy;
//! use surge_limit::Context;
//! use surge_limit::LimitAlgorithm;
//! use surge_limit::Limiter;
//! use surge_limit::Listener;
//!
//! let limit = Arc::new(VegasLimit::new_with_defaults());
//! let strategy = Arc::new(SimpleStrategy::new(limit.estimated_limit()));
//! let limiter = DefaultLimiter::new(limit, strategy);
//!
//! match limiter.acquire(&Context::new()) {
//!     Some(listener) => {
//!         // ... perform the protected operation ...
//!         listener.on_success();
//!     }
//!     None => {
//!         // limit exceeded, fail fast or fall back
//!     }
//! }
//! ```
//!
//! Blocking callers can wrap any limiter in
//! [`limiter::BlockingLimiter`] (condition-variable waiting) or
//! [`limiter::QueueBlockingLimiter`] (bounded FIFO/LIFO backlog with
//! timeout and cancellation).

mod context;
mod error;

pub mod limit;
pub mod limiter;
pub mod measurements;
pub mod metrics;
pub mod strategy;

pub use context::CancelHandle;
pub use context::Context;
pub use error::ConfigError;
pub use limit::LimitAlgorithm;
pub use limiter::Limiter;
pub use limiter::Listener;
pub use strategy::Strategy;
