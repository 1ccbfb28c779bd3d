use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;

use super::Rejection;
use super::Strategy;
use super::Token;

/// Mutex-guarded admission gate.
///
/// Unlike [`SimpleStrategy`](super::SimpleStrategy), the busy count is never
/// visible above the limit, even transiently, at the cost of lock
/// contention. Use it where strict accounting against the limit matters
/// more than hot-path throughput.
pub struct PreciseStrategy {
    inner: Arc<Mutex<State>>,
}

struct State {
    busy: usize,
    limit: usize,
}

impl PreciseStrategy {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                busy: 0,
                limit: limit.max(1),
            })),
        }
    }

    pub fn busy_count(&self) -> usize {
        self.inner.lock().busy
    }

    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }
}

impl Strategy for PreciseStrategy {
    fn try_acquire(&self, _ctx: &Context) -> ControlFlow<Rejection, Token> {
        let mut state = self.inner.lock();
        if state.busy >= state.limit {
            return ControlFlow::Break(Rejection::Exhausted {
                in_flight: state.busy,
            });
        }
        state.busy += 1;
        let in_flight = state.busy;
        let inner = Arc::clone(&self.inner);
        ControlFlow::Continue(Token::new(in_flight, move || {
            inner.lock().busy -= 1;
        }))
    }

    fn set_limit(&self, limit: usize) {
        self.inner.lock().limit = limit.max(1);
    }
}

impl fmt::Debug for PreciseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        write!(
            f,
            "PreciseStrategy{{busy={}, limit={}}}",
            state.busy, state.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn admits_up_to_the_limit() {
        let strategy = PreciseStrategy::new(2);
        let t1 = strategy.try_acquire(&Context::new());
        let t2 = strategy.try_acquire(&Context::new());
        assert!(t1.is_continue());
        assert!(t2.is_continue());
        assert!(strategy.try_acquire(&Context::new()).is_break());
        assert_eq!(strategy.busy_count(), 2);
    }

    #[test]
    fn busy_never_exceeds_the_limit_under_churn() {
        let limit = 4;
        let strategy = Arc::new(PreciseStrategy::new(limit));

        let mut handles = vec![];
        for _ in 0..8 {
            let strategy = Arc::clone(&strategy);
            handles.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    if let ControlFlow::Continue(token) = strategy.try_acquire(&Context::new()) {
                        assert!(token.in_flight() <= limit);
                        token.release();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(strategy.busy_count(), 0);
    }

    #[test]
    fn shrinking_the_limit_blocks_new_admissions() {
        let strategy = PreciseStrategy::new(2);
        let _t1 = strategy.try_acquire(&Context::new());
        let _t2 = strategy.try_acquire(&Context::new());
        strategy.set_limit(1);
        // Existing tokens drain naturally; new admissions are gated on the
        // new limit.
        assert!(strategy.try_acquire(&Context::new()).is_break());
    }
}
