use std::collections::BTreeMap;

use crate::CacheKey;
use crate::entry::{Entry, Publisher};

/// The mapping from keys to their [`Entry`].
///
/// A table never holds two entries for the same key, and never removes an entry.
/// It has no synchronization of its own: it is owned by exactly one coordination
/// strategy, which serializes all access to it.
pub(crate) struct Table<V, E> {
    name: String,
    entries: BTreeMap<CacheKey, Entry<V, E>>,
}

impl<V, E> Table<V, E>
where
    V: Clone,
    E: Clone,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Looks up the entry for `key`, creating a pending one if it does not exist yet.
    ///
    /// The [`Publisher`] is only returned to the single caller that created the
    /// entry. That caller is responsible for spawning the computation, once it
    /// relinquished its exclusive access to the table.
    pub fn lookup_or_insert(&mut self, key: &CacheKey) -> (Entry<V, E>, Option<Publisher<V, E>>) {
        if let Some(entry) = self.entries.get(key) {
            // A concurrent or repeated request was deduplicated.
            metric!(counter("memo.channel.hit") += 1, "memo" => &self.name);
            tracing::trace!(memo = %self.name, %key, "Attaching to existing entry");
            return (entry.clone(), None);
        }

        metric!(counter("memo.channel.miss") += 1, "memo" => &self.name);

        let (publisher, entry) = Entry::pending();
        let evicted = self.entries.insert(key.clone(), entry.clone());
        debug_assert!(evicted.is_none());

        (entry, Some(publisher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_entry_per_key() {
        let mut table = Table::<u32, ()>::new("test");
        let key = CacheKey::from("a");

        let (first, publisher) = table.lookup_or_insert(&key);
        let publisher = publisher.expect("first lookup creates the entry");

        let (second, none) = table.lookup_or_insert(&key);
        assert!(none.is_none());
        assert_eq!(table.len(), 1);

        publisher.publish(Ok(7));
        assert_eq!(first.wait().await, Ok(7));
        assert_eq!(second.wait().await, Ok(7));
    }

    #[test]
    fn test_distinct_keys_get_distinct_entries() {
        let mut table = Table::<u32, ()>::new("test");

        let (_, a) = table.lookup_or_insert(&CacheKey::from("a"));
        let (_, b) = table.lookup_or_insert(&CacheKey::from("b"));

        assert!(a.is_some());
        assert!(b.is_some());
        assert_eq!(table.len(), 2);
    }
}
