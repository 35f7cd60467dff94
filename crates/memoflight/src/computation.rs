use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::entry::Publisher;
use crate::utils::defer::defer;
use crate::{CacheKey, Producer};

/// Launches producer calls as independent tasks.
///
/// This is the only place the [`Producer`] is ever invoked. Each call runs in a task
/// of its own on the configured runtime, outside of any table bookkeeping, and
/// publishes its result into the [`Entry`](crate::entry::Entry) it was spawned for.
pub(crate) struct Computations<P: Producer> {
    name: Arc<str>,
    producer: Arc<P>,
    runtime: Handle,
    inflight: Arc<AtomicUsize>,
}

impl<P: Producer> Clone for Computations<P> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            producer: Arc::clone(&self.producer),
            runtime: self.runtime.clone(),
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<P: Producer> fmt::Debug for Computations<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computations")
            .field("name", &self.name)
            .field("inflight", &self.inflight())
            .finish()
    }
}

impl<P: Producer> Computations<P> {
    pub fn new(name: Arc<str>, producer: P, runtime: Handle) -> Self {
        Self {
            name,
            producer: Arc::new(producer),
            runtime,
            inflight: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// The number of producer calls that are currently running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Spawns the producer call for `key`, publishing its result through `publisher`.
    ///
    /// The computation is not tied to any caller: it runs to completion even when
    /// every waiter went away, or the cache was closed in the meantime.
    pub fn spawn(&self, key: CacheKey, publisher: Publisher<P::Value, P::Error>) {
        let name = Arc::clone(&self.name);
        let producer = Arc::clone(&self.producer);

        let running = self.inflight.fetch_add(1, Ordering::Relaxed) + 1;
        metric!(gauge("memo.computations.inflight") = running as u64, "memo" => &name);

        // Set right before publishing. A computation dropped without it being set,
        // by a panic or by the runtime shutting down, leaves its entry interrupted.
        let published = Arc::new(AtomicBool::new(false));

        let done_token = {
            let name = Arc::clone(&name);
            let key = key.clone();
            let inflight = Arc::clone(&self.inflight);
            let published = Arc::clone(&published);
            defer(move || {
                let running = inflight.fetch_sub(1, Ordering::Relaxed) - 1;
                metric!(gauge("memo.computations.inflight") = running as u64, "memo" => &name);

                if !published.load(Ordering::Acquire) {
                    let panicked = std::thread::panicking();
                    metric!(counter("memo.computation") += 1, "memo" => &name, "status" => "interrupted");
                    tracing::error!(memo = %name, %key, panicked, "Computation interrupted before publishing a result");
                }
            })
        };

        tracing::debug!(memo = %name, %key, "Spawning computation");
        let span = tracing::debug_span!("memoflight.compute", memo = %name, %key);

        let computation = async move {
            let start = Instant::now();
            let result = producer.produce(key).await;

            metric!(timer("memo.computation.duration") = start.elapsed(), "memo" => &name);
            metric!(
                counter("memo.computation") += 1,
                "memo" => &name,
                "status" => if result.is_ok() { "ok" } else { "error" },
            );
            tracing::trace!(ok = result.is_ok(), "Computation finished");

            // Account for the finished computation before anybody can observe its result.
            published.store(true, Ordering::Release);
            drop(done_token);
            publisher.publish(result);
        }
        .instrument(span)
        .bind_hub(Hub::new_from_top(Hub::current()));

        self.runtime.spawn(computation);
    }
}
