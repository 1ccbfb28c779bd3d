use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::never;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TryRecvError;

/// Per-operation context threaded through `Limiter::acquire`.
///
/// Carries an optional cancellation signal, an optional deadline, and string
/// values used by partitioned strategies. Cloning is cheap; all clones share
/// the same cancellation channel and value map.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    done: Option<Receiver<()>>,
    values: Option<Arc<HashMap<String, String>>>,
}

/// Cancels the associated [`Context`] when invoked or dropped.
///
/// Mirrors the usual cancel-on-scope-exit pattern: holding the handle keeps
/// the context live, dropping it (or calling [`CancelHandle::cancel`])
/// cancels every clone of the context.
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    /// Cancel the associated context.
    pub fn cancel(self) {
        // Dropping the sender disconnects the channel, which wakes any
        // select blocked on the done receiver.
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a string value readable by partition predicates and lookups.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut map = self
            .values
            .as_deref()
            .cloned()
            .unwrap_or_default();
        map.insert(key.into(), value.into());
        self.values = Some(Arc::new(map));
        self
    }

    /// Read a value previously attached with [`Context::with_value`].
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.as_ref()?.get(key).map(String::as_str)
    }

    /// Attach an absolute deadline after which the context counts as
    /// cancelled.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Make the context cancellable, returning the handle that cancels it.
    pub fn with_cancellation(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = bounded(1);
        self.done = Some(rx);
        (self, CancelHandle { _tx: tx })
    }

    /// Whether the context has been cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        match &self.done {
            Some(rx) => matches!(
                rx.try_recv(),
                Ok(()) | Err(TryRecvError::Disconnected)
            ),
            None => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A receiver that becomes ready when the context is cancelled. Never
    /// ready for contexts without a cancellation handle.
    pub(crate) fn done(&self) -> Receiver<()> {
        match &self.done {
            Some(rx) => rx.clone(),
            None => never(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("cancellable", &self.done.is_some())
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_context_is_never_cancelled() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn cancel_handle_cancels_all_clones() {
        let (ctx, handle) = Context::new().with_cancellation();
        let clone = ctx.clone();
        assert!(!ctx.is_cancelled());

        handle.cancel();
        assert!(ctx.is_cancelled());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let (ctx, handle) = Context::new().with_cancellation();
        drop(handle);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn deadline_in_the_past_counts_as_cancelled() {
        let ctx = Context::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_cancelled());

        let ctx = Context::new().with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn values_are_shared_across_clones() {
        let ctx = Context::new()
            .with_value("partition", "batch")
            .with_value("tenant", "a");
        let clone = ctx.clone();
        assert_eq!(clone.value("partition"), Some("batch"));
        assert_eq!(clone.value("tenant"), Some("a"));
        assert_eq!(clone.value("missing"), None);
    }
}
