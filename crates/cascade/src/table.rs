//! Row storage behind the in-memory stores.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ripple_core::StoreError;

/// Rows keyed by an auto-increment id. Everything done under one
/// [`Table::write`] guard commits as a whole.
#[derive(Debug)]
pub(crate) struct Table<V> {
    inner: RwLock<Rows<V>>,
}

#[derive(Debug)]
pub(crate) struct Rows<V> {
    next_id: i64,
    pub(crate) rows: BTreeMap<i64, V>,
}

impl<V> Rows<V> {
    pub(crate) fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Rows {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }
}

impl<V> Table<V> {
    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Rows<V>>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Rows<V>>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let table: Table<&str> = Table::default();
        let first = {
            let mut rows = table.write().unwrap();
            let id = rows.allocate();
            rows.rows.insert(id, "a");
            id
        };
        table.write().unwrap().rows.remove(&first);
        let second = table.write().unwrap().allocate();
        assert_eq!((first, second), (1, 2));
        assert!(table.read().unwrap().rows.is_empty());
    }

    proptest! {
        /// Any interleaving of inserts and deletes hands out strictly
        /// increasing ids.
        #[test]
        fn allocation_is_monotonic(ops in proptest::collection::vec(any::<bool>(), 1..80)) {
            let table: Table<u8> = Table::default();
            let mut last = 0;
            for insert in ops {
                let mut rows = table.write().unwrap();
                if insert {
                    let id = rows.allocate();
                    prop_assert!(id > last);
                    last = id;
                    rows.rows.insert(id, 0);
                } else if let Some(&oldest) = rows.rows.keys().next() {
                    rows.rows.remove(&oldest);
                }
            }
        }
    }
}
