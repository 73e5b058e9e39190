use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

const MIN_PURGE_THRESHOLD: usize = 64;

/// A path-keyed table of weakly held shared resources.
///
/// The table never keeps a resource alive: it lives exactly as long as some
/// caller holds the returned `Arc`. Lookup and insertion happen under one
/// lock, so concurrent callers asking for the same path share one resource.
/// Expired entries are swept once the map grows past a threshold that
/// tracks the live population.
pub struct WeakTable<V> {
    inner: Mutex<Entries<V>>,
}

struct Entries<V> {
    map: HashMap<PathBuf, Weak<V>>,
    purge_at: usize,
}

impl<V> Default for WeakTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> WeakTable<V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Entries {
                map: HashMap::new(),
                purge_at: MIN_PURGE_THRESHOLD,
            }),
        }
    }

    /// Returns the live resource for `key`, or creates one with `acquire`.
    ///
    /// A failed acquisition is returned to the caller and nothing is cached.
    pub fn get_or_try_insert<E>(
        &self,
        key: &Path,
        acquire: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        self.get_valid_or_try_insert(key, |_| true, acquire)
    }

    /// Like [`get_or_try_insert`](Self::get_or_try_insert), but a live
    /// resource failing `valid` is replaced by a freshly acquired one.
    pub fn get_valid_or_try_insert<E>(
        &self,
        key: &Path,
        valid: impl FnOnce(&V) -> bool,
        acquire: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let mut entries = self.inner.lock();

        if let Some(live) = entries.map.get(key).and_then(Weak::upgrade) {
            if valid(&live) {
                return Ok(live);
            }
        }

        let value = Arc::new(acquire()?);

        if entries.map.len() >= entries.purge_at {
            entries.map.retain(|_, weak| weak.strong_count() > 0);
            entries.purge_at = (entries.map.len() * 2).max(MIN_PURGE_THRESHOLD);
        }
        entries.map.insert(key.to_path_buf(), Arc::downgrade(&value));

        Ok(value)
    }

    /// The live resource for `key`, if any.
    pub fn get(&self, key: &Path) -> Option<Arc<V>> {
        self.inner.lock().map.get(key).and_then(Weak::upgrade)
    }

    /// Number of entries whose resource is still alive.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .map
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_while_held_and_forgets_after_drop() {
        let table = WeakTable::new();
        let key = Path::new("/a");

        let first = table.get_or_try_insert(key, || Ok::<_, ()>(1)).unwrap();
        let second = table.get_or_try_insert(key, || Ok::<_, ()>(2)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(first);
        drop(second);
        assert!(table.get(key).is_none());

        let third = table.get_or_try_insert(key, || Ok::<_, ()>(3)).unwrap();
        assert_eq!(*third, 3);
    }

    #[test]
    fn failures_are_not_cached() {
        let table: WeakTable<u32> = WeakTable::new();
        let key = Path::new("/missing");

        assert!(table.get_or_try_insert(key, || Err("nope")).is_err());
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn expired_entries_are_purged() {
        let table = WeakTable::new();
        for i in 0..(MIN_PURGE_THRESHOLD * 3) {
            let key = PathBuf::from(format!("/f{i}"));
            drop(table.get_or_try_insert(&key, || Ok::<_, ()>(i)).unwrap());
        }

        assert!(table.inner.lock().map.len() <= MIN_PURGE_THRESHOLD + 1);
    }
}
