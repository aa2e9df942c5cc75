//! Keyed record store with per-record locking.
//!
//! The outer map is read-mostly and only locked long enough to fetch or
//! insert an entry. Each record sits behind its own mutex, which callers
//! hold for the whole of one operation, so operations on one record are
//! serialized while different records proceed in parallel. Records are
//! never removed.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use opensettle_types::{Result, SettleError};
use parking_lot::{Mutex, RwLock};

#[derive(Debug)]
pub struct RecordStore<K, V> {
    records: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Default for RecordStore<K, V> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> RecordStore<K, V>
where
    K: Eq + Hash + Copy + Display,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// [`SettleError::AlreadyExists`] if `key` is taken.
    pub fn insert(&self, key: K, value: V) -> Result<Arc<Mutex<V>>> {
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(SettleError::AlreadyExists(key.to_string()));
        }
        let record = Arc::new(Mutex::new(value));
        records.insert(key, Arc::clone(&record));
        Ok(record)
    }

    /// # Errors
    /// [`SettleError::NotFound`] if `key` is absent.
    pub fn get(&self, key: &K) -> Result<Arc<Mutex<V>>> {
        self.records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SettleError::NotFound(key.to_string()))
    }

    /// A copy of the record as it is now.
    ///
    /// # Errors
    /// [`SettleError::NotFound`] if `key` is absent.
    pub fn snapshot(&self, key: &K) -> Result<V>
    where
        V: Clone,
    {
        Ok(self.get(key)?.lock().clone())
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.records.read().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
