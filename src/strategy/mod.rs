//! Admission strategies.
//!
//! A strategy accounts in-flight operations against the current limit. The
//! limiter consults it on every acquire and pushes new limits into it as the
//! estimator updates.

use std::fmt;
use std::fmt::Debug;
use std::ops::ControlFlow;

use crate::context::Context;

pub mod matchers;

mod partition;
mod precise;
mod simple;

pub use partition::LookupPartition;
pub use partition::LookupPartitionStrategy;
pub use partition::PredicatePartition;
pub use partition::PredicatePartitionStrategy;
pub use precise::PreciseStrategy;
pub use simple::SimpleStrategy;

/// Context key the default partition lookup reads.
pub const PARTITION_CONTEXT_KEY: &str = "partition";

/// Reasons why a strategy refused to admit an operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The limit has been reached; `in_flight` is the busy count observed at
    /// the time of the failure.
    Exhausted { in_flight: usize },
}

/// Admission receipt handed out by a strategy.
///
/// Releasing decrements the busy count. `release` consumes the token and a
/// token dropped without an explicit release still releases, so the count
/// can never leak or be decremented twice.
pub struct Token {
    in_flight: usize,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Token {
    pub fn new(in_flight: usize, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            in_flight,
            release: Some(Box::new(release)),
        }
    }

    /// The in-flight count observed when the token was acquired.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Release the token, decrementing the strategy's busy count.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token{{in_flight={}}}", self.in_flight)
    }
}

/// Stateful admission gate.
pub trait Strategy: Debug + Send + Sync {
    /// Try to admit one operation. `Break` carries the rejection detail;
    /// `Continue` carries a token that must be released when the operation
    /// completes.
    fn try_acquire(&self, ctx: &Context) -> ControlFlow<Rejection, Token>;

    /// Update the strategy with a new limit.
    fn set_limit(&self, limit: usize);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn token_releases_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = Arc::clone(&released);
        let token = Token::new(1, move || {
            released_clone.fetch_add(1, Ordering::SeqCst);
        });
        token.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_token_still_releases() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = Arc::clone(&released);
        {
            let _token = Token::new(1, move || {
                released_clone.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
