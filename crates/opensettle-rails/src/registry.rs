//! Rail registry: backend key → rail.
//!
//! Rails live in an append-only arena; the index maps each key to its slot.
//! Deals refer to rails only by [`RailKey`], so a rail can be swapped with
//! [`RailRegistry::replace`] without touching any deal record.

use std::collections::HashMap;
use std::sync::Arc;

use opensettle_types::{RailKey, Result, SettleError};
use tracing::info;

use crate::rail::Rail;

#[derive(Debug, Default)]
pub struct RailRegistry {
    rails: Vec<Arc<Rail>>,
    index: HashMap<RailKey, usize>,
}

impl RailRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new rail under `key`.
    ///
    /// # Errors
    /// [`SettleError::AlreadyExists`] if `key` is taken.
    pub fn register(&mut self, key: RailKey, rail: Rail) -> Result<Arc<Rail>> {
        if self.index.contains_key(&key) {
            return Err(SettleError::AlreadyExists(key.to_string()));
        }
        let rail = Arc::new(rail);
        info!(rail = %key, kind = %rail.kind(), "Rail registered");
        self.index.insert(key, self.rails.len());
        self.rails.push(Arc::clone(&rail));
        Ok(rail)
    }

    /// Point `key` at `rail`, returning the previous rail if any.
    pub fn replace(&mut self, key: RailKey, rail: Rail) -> Option<Arc<Rail>> {
        let rail = Arc::new(rail);
        info!(rail = %key, kind = %rail.kind(), "Rail replaced");
        match self.index.get(&key) {
            Some(&slot) => Some(std::mem::replace(&mut self.rails[slot], rail)),
            None => {
                self.index.insert(key, self.rails.len());
                self.rails.push(rail);
                None
            }
        }
    }

    /// # Errors
    /// [`SettleError::UnknownRail`] if nothing is registered under `key`.
    pub fn resolve(&self, key: &RailKey) -> Result<Arc<Rail>> {
        self.index
            .get(key)
            .and_then(|slot| self.rails.get(*slot))
            .cloned()
            .ok_or_else(|| SettleError::UnknownRail(key.clone()))
    }

    #[must_use]
    pub fn contains(&self, key: &RailKey) -> bool {
        self.index.contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<RailKey> {
        let mut keys: Vec<_> = self.index.keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
