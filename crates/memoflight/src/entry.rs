//! Per-key result slots.
//!
//! An [`Entry`] is created in the pending state together with the single
//! [`Publisher`] that is able to complete it. Publishing consumes the publisher,
//! so the result is written exactly once, and the write itself raises the
//! readiness signal. Waiters only ever observe a fully published result.

use std::fmt;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::MemoError;

/// The readiness signal of an [`Entry`], resolving once the result is published.
type ReadySignal<V, E> = Shared<oneshot::Receiver<Result<V, E>>>;

/// The memoized result of one key, pending or ready.
///
/// Cloning an entry is cheap and yields another handle to the same slot.
pub struct Entry<V, E> {
    ready: ReadySignal<V, E>,
}

/// The write half of an [`Entry`].
///
/// Dropping a publisher without publishing completes the entry with
/// [`MemoError::Interrupted`].
pub struct Publisher<V, E> {
    sender: oneshot::Sender<Result<V, E>>,
}

impl<V, E> Entry<V, E>
where
    V: Clone,
    E: Clone,
{
    /// Creates a new pending entry along with its publisher.
    pub fn pending() -> (Publisher<V, E>, Self) {
        let (sender, receiver) = oneshot::channel();
        let entry = Self {
            ready: receiver.shared(),
        };
        (Publisher { sender }, entry)
    }

    /// Waits for the result to be published and returns a copy of it.
    pub async fn wait(self) -> Result<V, MemoError<E>> {
        match self.ready.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(MemoError::Producer(err)),
            Err(oneshot::Canceled) => Err(MemoError::Interrupted),
        }
    }
}

impl<V, E> Clone for Entry<V, E>
where
    V: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            ready: self.ready.clone(),
        }
    }
}

impl<V, E> fmt::Debug for Entry<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").finish_non_exhaustive()
    }
}

impl<V, E> Publisher<V, E> {
    /// Publishes the result, waking up all waiters.
    pub fn publish(self, result: Result<V, E>) {
        // Nobody is listening anymore when the entry was dropped along with the
        // table and all waiters. The result is discarded in that case.
        self.sender.send(result).ok();
    }

    /// Whether every handle to the entry has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_canceled()
    }
}

impl<V, E> fmt::Debug for Publisher<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}
