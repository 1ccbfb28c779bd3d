use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::after;
use crossbeam_channel::bounded;
use crossbeam_channel::never;
use crossbeam_channel::select;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::context::Context;

use super::Limiter;
use super::Listener;

const DEFAULT_MAX_BACKLOG_SIZE: usize = 100;
const DEFAULT_MAX_BACKLOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Which end of the backlog is woken first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOrdering {
    /// Oldest waiter first. Fairest under sustained load.
    #[default]
    Fifo,
    /// Newest waiter first. Keeps success latencies low when some waiters
    /// are going to time out anyway.
    Lifo,
}

/// Configuration for [`QueueBlockingLimiter`].
#[derive(Debug, Clone)]
pub struct QueueLimiterConfig {
    /// Upper bound on queued waiters; further acquires fail immediately.
    /// Default 100.
    pub max_backlog_size: usize,
    /// How long a waiter stays queued before giving up. Default 1 s.
    pub max_backlog_timeout: Duration,
    /// Which end of the backlog is unblocked first. Default FIFO.
    pub ordering: QueueOrdering,
    /// Also evict a waiter as soon as its context is cancelled, rather than
    /// only at the timeout. Default false.
    pub backlog_evict_done_ctx: bool,
}

impl Default for QueueLimiterConfig {
    fn default() -> Self {
        Self {
            max_backlog_size: DEFAULT_MAX_BACKLOG_SIZE,
            max_backlog_timeout: DEFAULT_MAX_BACKLOG_TIMEOUT,
            ordering: QueueOrdering::default(),
            backlog_evict_done_ctx: false,
        }
    }
}

/// Limiter that queues rejected acquires in a bounded backlog and hands
/// them slots as admitted operations complete.
///
/// Favors availability over latency: requests wait instead of fast-failing,
/// but the backlog bound keeps the queue from growing without limit during
/// an outage. Every released listener unblocks at most one waiter, chosen
/// by the configured ordering.
pub struct QueueBlockingLimiter<D: ?Sized> {
    inner: Arc<QueueInner<D>>,
}

struct QueueInner<D: ?Sized> {
    max_backlog_size: usize,
    max_backlog_timeout: Duration,
    evict_done_ctx: bool,
    backlog: Mutex<Backlog>,
    delegate: Arc<D>,
}

struct Waiter {
    ctx: Context,
    tx: Sender<Box<dyn Listener>>,
}

/// Bounded waiter queue with O(1) eviction.
///
/// Eviction removes the waiter from the id map and leaves a tombstone id in
/// the order queue; peeking skips and discards tombstones lazily.
struct Backlog {
    ordering: QueueOrdering,
    order: VecDeque<u64>,
    waiters: HashMap<u64, Waiter>,
    next_id: u64,
}

impl Backlog {
    fn new(ordering: QueueOrdering) -> Self {
        Self {
            ordering,
            order: VecDeque::new(),
            waiters: HashMap::new(),
            next_id: 1,
        }
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }

    fn push(&mut self, ctx: Context, tx: Sender<Box<dyn Listener>>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.order.push_back(id);
        self.waiters.insert(id, Waiter { ctx, tx });
        id
    }

    fn evict(&mut self, id: u64) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Id of the next waiter to unblock, skipping evicted tombstones.
    fn peek(&mut self) -> Option<u64> {
        loop {
            let candidate = match self.ordering {
                QueueOrdering::Fifo => *self.order.front()?,
                QueueOrdering::Lifo => *self.order.back()?,
            };
            if self.waiters.contains_key(&candidate) {
                return Some(candidate);
            }
            match self.ordering {
                QueueOrdering::Fifo => self.order.pop_front(),
                QueueOrdering::Lifo => self.order.pop_back(),
            };
        }
    }

    fn take(&mut self, id: u64) -> Option<Waiter> {
        self.waiters.remove(&id)
    }
}

impl<D: Limiter + ?Sized + 'static> QueueBlockingLimiter<D> {
    pub fn new_with_defaults(delegate: Arc<D>) -> Self {
        Self::new(delegate, QueueLimiterConfig::default())
    }

    pub fn new(delegate: Arc<D>, config: QueueLimiterConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_backlog_size: config.max_backlog_size.max(1),
                max_backlog_timeout: config.max_backlog_timeout,
                evict_done_ctx: config.backlog_evict_done_ctx,
                backlog: Mutex::new(Backlog::new(config.ordering)),
                delegate,
            }),
        }
    }

    /// Number of currently queued waiters.
    pub fn backlog_len(&self) -> usize {
        self.inner.backlog.lock().len()
    }
}

impl<D: Limiter + ?Sized + 'static> QueueInner<D> {
    /// Called after every listener release: hand the freed slot to the next
    /// waiter, if any.
    fn unblock(self: Arc<Self>) {
        let mut backlog = self.backlog.lock();
        let Some(id) = backlog.peek() else {
            return;
        };
        let ctx = backlog
            .waiters
            .get(&id)
            .expect("peeked waiter is present")
            .ctx
            .clone();

        // Still can't acquire the limit: unblock runs again on the next
        // release.
        let Some(listener) = self.delegate.acquire(&ctx) else {
            return;
        };

        let waiter = backlog.take(id).expect("peeked waiter is present");
        let wrapped: Box<dyn Listener> = Box::new(QueueListener {
            delegate: listener,
            inner: Arc::clone(&self),
        });
        let undelivered = waiter.tx.try_send(wrapped).err();
        drop(backlog);

        // The waiter stopped listening between the peek and the send; give
        // the slot back so the token is not leaked.
        if let Some(undelivered) = undelivered {
            undelivered.into_inner().on_ignore();
        }
    }
}

impl<D: Limiter + ?Sized + 'static> Limiter for QueueBlockingLimiter<D> {
    fn acquire(&self, ctx: &Context) -> Option<Box<dyn Listener>> {
        if ctx.is_cancelled() {
            return None;
        }

        if let Some(listener) = self.inner.delegate.acquire(ctx) {
            return Some(Box::new(QueueListener {
                delegate: listener,
                inner: Arc::clone(&self.inner),
            }));
        }

        let (tx, rx) = bounded::<Box<dyn Listener>>(1);
        let id = {
            let mut backlog = self.inner.backlog.lock();
            // Restrict the backlog so the queue doesn't grow unbounded
            // during an outage.
            if backlog.len() >= self.inner.max_backlog_size {
                return None;
            }
            backlog.push(ctx.clone(), tx)
        };

        let mut timeout = self.inner.max_backlog_timeout;
        if let Some(deadline) = ctx.deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }
        let done = if self.inner.evict_done_ctx {
            ctx.done()
        } else {
            never()
        };

        let delivered = select! {
            recv(rx) -> listener => listener.ok(),
            recv(done) -> _ => None,
            recv(after(timeout)) -> _ => None,
        };
        if let Some(listener) = delivered {
            return Some(listener);
        }

        // Timed out or cancelled. Either the waiter is still queued and we
        // evict it, or delivery won the race and the listener is already in
        // the channel; the send happens under the backlog lock, so after
        // taking it the channel state is settled.
        let mut backlog = self.inner.backlog.lock();
        if backlog.evict(id) {
            return None;
        }
        drop(backlog);
        rx.try_recv().ok()
    }
}

impl<D: Limiter + ?Sized + fmt::Debug> fmt::Debug for QueueBlockingLimiter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueBlockingLimiter{{delegate={:?}, max_backlog_size={}, max_backlog_timeout={:?}}}",
            self.inner.delegate, self.inner.max_backlog_size, self.inner.max_backlog_timeout
        )
    }
}

struct QueueListener<D: ?Sized> {
    delegate: Box<dyn Listener>,
    inner: Arc<QueueInner<D>>,
}

impl<D: Limiter + ?Sized + 'static> Listener for QueueListener<D> {
    fn on_success(self: Box<Self>) {
        let this = *self;
        this.delegate.on_success();
        this.inner.unblock();
    }

    fn on_ignore(self: Box<Self>) {
        let this = *self;
        this.delegate.on_ignore();
        this.inner.unblock();
    }

    fn on_dropped(self: Box<Self>) {
        let this = *self;
        this.delegate.on_dropped();
        this.inner.unblock();
    }
}
