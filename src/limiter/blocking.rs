use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::context::Context;

use super::Limiter;
use super::Listener;

/// Limiter that blocks the calling thread when the limit has been reached.
///
/// Commonly used by batch clients that want the limiter as a back-pressure
/// mechanism rather than a fast-fail gate. Without a timeout the caller
/// waits until a slot frees up; with one, waiting gives up after the
/// timeout, and `Duration::ZERO` degenerates to a non-blocking fast-fail
/// limiter. Waiters are woken in no particular order.
pub struct BlockingLimiter<D: ?Sized> {
    delegate: Arc<D>,
    timeout: Option<Duration>,
    wait: Arc<WaitSet>,
}

struct WaitSet {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitSet {
    fn notify(&self) {
        // Taking the lock orders the notification against a waiter that is
        // between a failed acquire and its wait, so no wakeup is lost.
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

impl<D: Limiter + ?Sized> BlockingLimiter<D> {
    /// Block indefinitely until a slot frees up.
    pub fn new(delegate: Arc<D>) -> Self {
        Self {
            delegate,
            timeout: None,
            wait: Arc::new(WaitSet {
                lock: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Give up waiting after `timeout`.
    pub fn with_timeout(delegate: Arc<D>, timeout: Duration) -> Self {
        let mut limiter = Self::new(delegate);
        limiter.timeout = Some(timeout);
        limiter
    }
}

impl<D: Limiter + ?Sized + 'static> Limiter for BlockingLimiter<D> {
    fn acquire(&self, ctx: &Context) -> Option<Box<dyn Listener>> {
        if ctx.is_cancelled() {
            return None;
        }

        let mut deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        if let Some(ctx_deadline) = ctx.deadline() {
            deadline = Some(match deadline {
                Some(deadline) => deadline.min(ctx_deadline),
                None => ctx_deadline,
            });
        }

        // The lock is held across the try/wait loop so a release between a
        // failed acquire and the wait cannot slip by unnoticed.
        let mut guard = self.wait.lock.lock();
        loop {
            if let Some(listener) = self.delegate.acquire(ctx) {
                return Some(Box::new(BlockingListener {
                    delegate: listener,
                    wait: Arc::clone(&self.wait),
                }));
            }

            match deadline {
                Some(deadline) => {
                    if self
                        .wait
                        .condvar
                        .wait_until(&mut guard, deadline)
                        .timed_out()
                    {
                        return None;
                    }
                }
                None => self.wait.condvar.wait(&mut guard),
            }

            if ctx.is_cancelled() {
                return None;
            }
        }
    }
}

impl<D: Limiter + ?Sized + fmt::Debug> fmt::Debug for BlockingLimiter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockingLimiter{{delegate={:?}, timeout={:?}}}",
            self.delegate, self.timeout
        )
    }
}

struct BlockingListener {
    delegate: Box<dyn Listener>,
    wait: Arc<WaitSet>,
}

impl Listener for BlockingListener {
    fn on_success(self: Box<Self>) {
        let this = *self;
        this.delegate.on_success();
        this.wait.notify();
    }

    fn on_ignore(self: Box<Self>) {
        let this = *self;
        this.delegate.on_ignore();
        this.wait.notify();
    }

    fn on_dropped(self: Box<Self>) {
        let this = *self;
        this.delegate.on_dropped();
        this.wait.notify();
    }
}
