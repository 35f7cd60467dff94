use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// The identifier under which a computation result is memoized.
///
/// Keys are opaque strings with a total order. They are cheap to clone, as the
/// same key is shared between the table, the running computation and all
/// waiting callers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a new key from the given string.
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self::new(key.as_str())
    }
}

impl From<Arc<str>> for CacheKey {
    fn from(key: Arc<str>) -> Self {
        Self(key)
    }
}
