use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::computation::Computations;
use crate::config::{MemoConfig, Strategy};
use crate::coordinator::CoordinatorHandle;
use crate::entry::Entry;
use crate::locked::LockedTable;
use crate::{CacheKey, MemoError, Producer};

enum Coordination<P: Producer> {
    Actor(CoordinatorHandle<P>),
    Locked(LockedTable<P>),
}

/// A concurrency-safe memoizing cache around a [`Producer`].
///
/// The producer is invoked at most once per key for the lifetime of the cache, no
/// matter how many callers request that key concurrently or later on. Every caller
/// receives a copy of that single result, which includes errors: a failed
/// computation is memoized just like a successful one and is never retried.
///
/// Computations for different keys run fully in parallel, each in a task of its own
/// on the runtime the cache was created with. A slow computation only delays the
/// callers that are interested in its key.
///
/// The cache is usable until [`close`](Self::close) is called or it is dropped.
pub struct Memo<P: Producer> {
    computations: Computations<P>,
    coordination: Coordination<P>,
}

impl<P: Producer> Memo<P> {
    /// Creates a cache with the default configuration on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(producer: P) -> Self {
        Self::with_config(producer, &MemoConfig::default(), Handle::current())
    }

    /// Creates a cache whose computations are spawned on `runtime`.
    pub fn with_config(producer: P, config: &MemoConfig, runtime: Handle) -> Self {
        let computations = Computations::new(Arc::from(config.name.as_str()), producer, runtime);

        let coordination = match config.strategy {
            Strategy::Actor => Coordination::Actor(CoordinatorHandle::spawn(
                computations.clone(),
                config.queue_capacity,
            )),
            Strategy::Locked => Coordination::Locked(LockedTable::new(&config.name)),
        };

        tracing::debug!(
            memo = %config.name,
            strategy = %config.strategy,
            "Created memo cache"
        );

        Self {
            computations,
            coordination,
        }
    }

    /// The name of this cache.
    pub fn name(&self) -> &str {
        self.computations.name()
    }

    /// The coordination strategy of this cache.
    pub fn strategy(&self) -> Strategy {
        match self.coordination {
            Coordination::Actor(_) => Strategy::Actor,
            Coordination::Locked(_) => Strategy::Locked,
        }
    }

    /// Returns the memoized result for `key`, computing it first if necessary.
    ///
    /// The first request for a key spawns the computation; this and all further
    /// requests wait for its result. Dropping the returned future does not cancel
    /// the computation, the result is memoized all the same.
    ///
    /// # Errors
    ///
    /// - [`MemoError::Producer`] if the producer failed for `key`, now or in an
    ///   earlier computation.
    /// - [`MemoError::Interrupted`] if the computation for `key` ended without a
    ///   result, for instance because the producer panicked.
    /// - [`MemoError::Closed`] if the cache was closed.
    pub async fn get(
        &self,
        key: impl Into<CacheKey>,
    ) -> Result<P::Value, MemoError<P::Error>> {
        let key = key.into();
        metric!(counter("memo.access") += 1, "memo" => self.name());

        let entry = match self.lookup(key.clone()).await {
            Ok(entry) => entry,
            Err(err) => {
                metric!(counter("memo.closed_access") += 1, "memo" => self.name());
                tracing::error!(memo = %self.name(), %key, "Requested key from closed memo cache");
                return Err(err);
            }
        };

        entry.wait().await
    }

    /// Like [`get`](Self::get), but blocks the current thread until the result is
    /// available.
    ///
    /// This must not be called from within an async context: it would block a
    /// worker thread of the runtime that might have to drive the computation.
    pub fn get_blocking(
        &self,
        key: impl Into<CacheKey>,
    ) -> Result<P::Value, MemoError<P::Error>> {
        futures::executor::block_on(self.get(key))
    }

    async fn lookup(
        &self,
        key: CacheKey,
    ) -> Result<Entry<P::Value, P::Error>, MemoError<P::Error>> {
        match &self.coordination {
            Coordination::Actor(coordinator) => coordinator.lookup(key).await,
            Coordination::Locked(table) => table.lookup(key, &self.computations),
        }
    }

    /// Closes the cache.
    ///
    /// All further calls to [`get`](Self::get) fail with [`MemoError::Closed`].
    /// Callers that are already waiting for a result still receive it, and running
    /// computations are not cancelled. Closing an already closed cache does nothing.
    pub fn close(&self) {
        let was_open = match &self.coordination {
            Coordination::Actor(coordinator) => coordinator.close(),
            Coordination::Locked(table) => table.close(),
        };
        if was_open {
            tracing::debug!(memo = %self.name(), "Closed memo cache");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        match &self.coordination {
            Coordination::Actor(coordinator) => coordinator.is_closed(),
            Coordination::Locked(table) => table.is_closed(),
        }
    }

    /// The number of producer calls that are currently running.
    pub fn inflight(&self) -> usize {
        self.computations.inflight()
    }
}

impl<P: Producer> fmt::Debug for Memo<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Memo");
        debug
            .field("name", &self.name())
            .field("strategy", &self.strategy())
            .field("closed", &self.is_closed())
            .field("inflight", &self.inflight());
        if let Coordination::Locked(table) = &self.coordination {
            debug.field("entries", &table.len());
        }
        debug.finish()
    }
}
