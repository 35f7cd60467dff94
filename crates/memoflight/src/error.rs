use thiserror::Error;

/// The error returned by [`Memo::get`](crate::Memo::get).
///
/// Apart from [`Closed`](Self::Closed), every variant is memoized: once a key
/// resolved to an error, all current and future callers for that key receive
/// the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoError<E> {
    /// The producer failed to compute the value.
    ///
    /// The attached error is exactly the one the producer returned.
    #[error("{0}")]
    Producer(E),
    /// The cache was closed before the request could be served.
    ///
    /// Calling `get` after `close` is a misuse of the cache. It is reported
    /// immediately and never memoized.
    #[error("memo cache is closed")]
    Closed,
    /// The computation ended without publishing a result.
    ///
    /// This happens when the producer panics, or when the runtime it was
    /// spawned on shuts down.
    #[error("memo computation was interrupted")]
    Interrupted,
}

impl<E> MemoError<E> {
    /// Returns the producer error, if this is one.
    pub fn producer_error(&self) -> Option<&E> {
        match self {
            Self::Producer(err) => Some(err),
            _ => None,
        }
    }

    /// A short name for this kind of error, used as a metrics tag.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Producer(_) => "error",
            Self::Closed => "closed",
            Self::Interrupted => "interrupted",
        }
    }
}
