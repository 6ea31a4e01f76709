//! Memoization of derived product values.
//!
//! Each entry has its own lock: computing one value never blocks readers
//! of another, and two callers asking for the same key compute it once.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::types::{ProductError, ProductResult};

type Slot<V> = Arc<Mutex<Option<V>>>;

#[derive(Debug)]
pub struct Memo<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Memo<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> ProductResult<Slot<V>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ProductError::Raster("cache lock poisoned".to_string()))?;
        Ok(entries.entry(key.clone()).or_default().clone())
    }

    /// Cached value for `key`, computing it with `f` on first access.
    /// Errors are not cached, the next call retries.
    pub fn get_or_try_insert_with<F>(&self, key: K, f: F) -> ProductResult<V>
    where
        F: FnOnce() -> ProductResult<V>,
    {
        let slot = self.slot(&key)?;
        let mut value = slot
            .lock()
            .map_err(|_| ProductError::Raster("cache entry lock poisoned".to_string()))?;
        if let Some(v) = value.as_ref() {
            return Ok(v.clone());
        }
        let computed = f()?;
        *value = Some(computed.clone());
        Ok(computed)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.entries.lock().ok()?.get(key)?.clone();
        let value = slot.lock().ok()?;
        value.clone()
    }

    /// Number of computed entries
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|slot| slot.lock().map(|v| v.is_some()).unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
