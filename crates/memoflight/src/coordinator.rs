use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::computation::Computations;
use crate::entry::Entry;
use crate::table::Table;
use crate::{CacheKey, MemoError, Producer};

type EntryFor<P> = Entry<<P as Producer>::Value, <P as Producer>::Error>;

/// A request for the entry of `key`.
struct Request<P: Producer> {
    key: CacheKey,
    response: oneshot::Sender<EntryFor<P>>,
}

/// The task that exclusively owns the table.
///
/// Requests are processed strictly one after another, which makes every
/// lookup-or-insert atomic without any lock. The coordinator only hands out
/// entries and spawns computations; it never waits for a result itself.
struct Coordinator<P: Producer> {
    computations: Computations<P>,
    table: Table<P::Value, P::Error>,
    requests: mpsc::Receiver<Request<P>>,
}

impl<P: Producer> Coordinator<P> {
    async fn run(mut self) {
        let name = self.computations.name().to_owned();
        tracing::debug!(memo = %name, "Coordinator started");

        while let Some(Request { key, response }) = self.requests.recv().await {
            let (entry, publisher) = self.table.lookup_or_insert(&key);

            // The caller might have given up on its request already. The computation
            // is spawned regardless, as the entry is part of the table now.
            response.send(entry).ok();

            if let Some(publisher) = publisher {
                self.computations.spawn(key, publisher);
            }
        }

        tracing::debug!(
            memo = %name,
            entries = self.table.len(),
            "Coordinator shut down"
        );
    }
}

/// The client side of the [`Coordinator`] task.
///
/// Closing the handle drops its request sender. The coordinator finishes the
/// requests that are already queued and then shuts down, dropping the table.
pub(crate) struct CoordinatorHandle<P: Producer> {
    requests: Mutex<Option<mpsc::Sender<Request<P>>>>,
}

impl<P: Producer> CoordinatorHandle<P> {
    /// Spawns the coordinator task on the runtime of `computations`.
    pub fn spawn(computations: Computations<P>, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));

        let coordinator = Coordinator {
            table: Table::new(computations.name()),
            computations: computations.clone(),
            requests: receiver,
        };
        computations.runtime().spawn(coordinator.run());

        Self {
            requests: Mutex::new(Some(sender)),
        }
    }

    /// Asks the coordinator for the entry of `key`.
    pub async fn lookup(&self, key: CacheKey) -> Result<EntryFor<P>, MemoError<P::Error>> {
        // Clone the sender so that the lock is not held while waiting for queue capacity.
        let requests = self.requests.lock().clone().ok_or(MemoError::Closed)?;

        let (response, receiver) = oneshot::channel();
        requests
            .send(Request { key, response })
            .await
            .map_err(|_| MemoError::Closed)?;
        drop(requests);

        receiver.await.map_err(|_| MemoError::Closed)
    }

    /// Stops accepting requests, returning `true` if the handle was still open.
    pub fn close(&self) -> bool {
        let requests = self.requests.lock().take();
        requests.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.lock().is_none()
    }
}
