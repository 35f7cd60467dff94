use parking_lot::Mutex;

use crate::computation::Computations;
use crate::entry::Entry;
use crate::table::Table;
use crate::{CacheKey, MemoError, Producer};

type Entries<P> = Table<<P as Producer>::Value, <P as Producer>::Error>;

/// Coordination through a table guarded by a mutex.
///
/// The lookup and the insertion of a pending entry form one critical section.
/// The lock is released before the computation is spawned, and it is never held
/// while waiting for a result.
pub(crate) struct LockedTable<P: Producer> {
    table: Mutex<Option<Entries<P>>>,
}

impl<P: Producer> LockedTable<P> {
    pub fn new(name: &str) -> Self {
        Self {
            table: Mutex::new(Some(Table::new(name))),
        }
    }

    pub fn lookup(
        &self,
        key: CacheKey,
        computations: &Computations<P>,
    ) -> Result<Entry<P::Value, P::Error>, MemoError<P::Error>> {
        let (entry, publisher) = {
            let mut table = self.table.lock();
            let table = table.as_mut().ok_or(MemoError::Closed)?;
            table.lookup_or_insert(&key)
        };

        if let Some(publisher) = publisher {
            computations.spawn(key, publisher);
        }

        Ok(entry)
    }

    /// The number of keys in the table, or `None` once closed.
    pub fn len(&self) -> Option<usize> {
        self.table.lock().as_ref().map(Table::len)
    }

    /// Drops the table, returning `true` if it was still open.
    pub fn close(&self) -> bool {
        let table = self.table.lock().take();
        table.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().is_none()
    }
}
