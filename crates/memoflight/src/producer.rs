use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::CacheKey;

/// The computation that is being memoized.
///
/// A producer maps a [`CacheKey`] to either a value or an error. The cache invokes it
/// at most once per key, from a task of its own, so the producer may be called
/// concurrently for *different* keys but never twice for the same key.
///
/// Both values and errors are cloned out to every caller waiting for a key, so
/// expensive payloads should be wrapped in an [`Arc`] or a cheaply clonable
/// buffer type.
pub trait Producer: 'static + Send + Sync {
    /// The successful result of a computation.
    type Value: 'static + Send + Sync + Clone;
    /// The error of a failed computation.
    type Error: 'static + Send + Sync + Clone;

    /// Computes the value for `key`.
    ///
    /// The returned future is driven on the runtime the cache was created with.
    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<Self::Value, Self::Error>>;
}

impl<P: Producer> Producer for Arc<P> {
    type Value = P::Value;
    type Error = P::Error;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<Self::Value, Self::Error>> {
        (**self).produce(key)
    }
}

/// A [`Producer`] backed by an async function, see [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FromFn").finish_non_exhaustive()
    }
}

/// Creates a [`Producer`] from a function returning a future.
///
/// ```
/// let producer = memoflight::from_fn(|key: memoflight::CacheKey| async move {
///     Ok::<_, String>(key.as_str().len())
/// });
/// # let _ = producer;
/// ```
pub fn from_fn<F, Fut, V, E>(f: F) -> FromFn<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    FromFn(f)
}

impl<F, Fut, V, E> Producer for FromFn<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    V: 'static + Send + Sync + Clone,
    E: 'static + Send + Sync + Clone,
{
    type Value = V;
    type Error = E;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<V, E>> {
        Box::pin((self.0)(key))
    }
}

/// A [`Producer`] backed by a synchronous function, see [`blocking`].
pub struct Blocking<F>(Arc<F>);

impl<F> Clone for Blocking<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F> fmt::Debug for Blocking<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Blocking").finish_non_exhaustive()
    }
}

/// Creates a [`Producer`] from a synchronous, possibly slow function.
///
/// The function is run on the blocking thread pool of the runtime, so it may
/// perform blocking I/O without stalling other computations.
pub fn blocking<F, V, E>(f: F) -> Blocking<F>
where
    F: Fn(CacheKey) -> Result<V, E> + Send + Sync + 'static,
{
    Blocking(Arc::new(f))
}

impl<F, V, E> Producer for Blocking<F>
where
    F: Fn(CacheKey) -> Result<V, E> + Send + Sync + 'static,
    V: 'static + Send + Sync + Clone,
    E: 'static + Send + Sync + Clone,
{
    type Value = V;
    type Error = E;

    fn produce(&self, key: CacheKey) -> BoxFuture<'static, Result<V, E>> {
        let func = Arc::clone(&self.0);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || func(key)).await {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                // The blocking pool only cancels tasks when the runtime shuts down,
                // which tears down this computation as well.
                Err(_) => futures::future::pending().await,
            }
        })
    }
}
