use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::context::Context;

use super::Rejection;
use super::Strategy;
use super::Token;

/// Lock-free admission gate: a single atomic busy counter checked against
/// the limit.
///
/// The counter is optimistically incremented and rolled back on rejection,
/// so a concurrent reader can observe a transient overshoot, but the number
/// of admitted operations never exceeds the limit.
pub struct SimpleStrategy {
    limit: AtomicUsize,
    busy: Arc<AtomicUsize>,
}

impl SimpleStrategy {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit.max(1)),
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of currently admitted operations.
    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// The current limit.
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }
}

impl Strategy for SimpleStrategy {
    fn try_acquire(&self, _ctx: &Context) -> ControlFlow<Rejection, Token> {
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        if busy <= self.limit.load(Ordering::Acquire) {
            let counter = Arc::clone(&self.busy);
            ControlFlow::Continue(Token::new(busy, move || {
                counter.fetch_sub(1, Ordering::SeqCst);
            }))
        } else {
            self.busy.fetch_sub(1, Ordering::SeqCst);
            ControlFlow::Break(Rejection::Exhausted {
                in_flight: busy - 1,
            })
        }
    }

    fn set_limit(&self, limit: usize) {
        self.limit.store(limit.max(1), Ordering::Release);
    }
}

impl fmt::Debug for SimpleStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SimpleStrategy{{busy={}, limit={}}}",
            self.busy_count(),
            self.limit()
        )
    }
}
