//! Nonce registry: replay protection for delegated authorizations.
//!
//! Each `(payer, nonce)` pair is accepted exactly once. Entries are never
//! evicted. Every payer has its own nonce set behind its own mutex, so
//! authorizations from different payers never wait on each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use opensettle_types::{PartyId, Result, SettleError};
use parking_lot::{Mutex, RwLock};

/// Nonces consumed by one payer.
#[derive(Debug)]
pub struct PayerNonces {
    payer: PartyId,
    used: HashSet<u64>,
}

impl PayerNonces {
    #[must_use]
    pub fn new(payer: PartyId) -> Self {
        Self {
            payer,
            used: HashSet::new(),
        }
    }

    #[must_use]
    pub fn payer(&self) -> PartyId {
        self.payer
    }

    #[must_use]
    pub fn is_used(&self, nonce: u64) -> bool {
        self.used.contains(&nonce)
    }

    /// # Errors
    /// [`SettleError::NonceReused`] if the nonce was already consumed.
    pub fn ensure_unused(&self, nonce: u64) -> Result<()> {
        if self.is_used(nonce) {
            return Err(SettleError::NonceReused {
                payer: self.payer,
                nonce,
            });
        }
        Ok(())
    }

    /// Mark a nonce as used.
    ///
    /// # Errors
    /// [`SettleError::NonceReused`] if the nonce was already consumed.
    pub fn consume(&mut self, nonce: u64) -> Result<()> {
        if !self.used.insert(nonce) {
            return Err(SettleError::NonceReused {
                payer: self.payer,
                nonce,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct NonceRegistry {
    payers: RwLock<HashMap<PartyId, Arc<Mutex<PayerNonces>>>>,
}

impl NonceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The payer's nonce set, created on first use. Hold its lock from the
    /// check until the nonce is consumed.
    pub fn slot(&self, payer: PartyId) -> Arc<Mutex<PayerNonces>> {
        if let Some(slot) = self.payers.read().get(&payer) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.payers
                .write()
                .entry(payer)
                .or_insert_with(|| Arc::new(Mutex::new(PayerNonces::new(payer)))),
        )
    }

    #[must_use]
    pub fn is_used(&self, payer: &PartyId, nonce: u64) -> bool {
        let slot = self.payers.read().get(payer).map(Arc::clone);
        slot.is_some_and(|s| s.lock().is_used(nonce))
    }

    /// Number of nonces consumed by `payer`.
    #[must_use]
    pub fn count(&self, payer: &PartyId) -> usize {
        let slot = self.payers.read().get(payer).map(Arc::clone);
        slot.map_or(0, |s| s.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_ok() {
        let reg = NonceRegistry::new();
        let payer = PartyId::random();
        let slot = reg.slot(payer);
        {
            let mut nonces = slot.lock();
            assert!(nonces.ensure_unused(1).is_ok());
            nonces.consume(1).unwrap();
        }
        assert!(reg.is_used(&payer, 1));
        assert_eq!(reg.count(&payer), 1);
    }

    #[test]
    fn replay_blocked() {
        let reg = NonceRegistry::new();
        let payer = PartyId::random();
        reg.slot(payer).lock().consume(9).unwrap();

        let slot = reg.slot(payer);
        let mut nonces = slot.lock();
        let err = nonces.consume(9).unwrap_err();
        assert!(
            matches!(err, SettleError::NonceReused { nonce: 9, payer: p } if p == payer),
            "Expected NonceReused, got: {err:?}"
        );
        assert!(nonces.ensure_unused(9).is_err());
    }

    #[test]
    fn nonces_are_per_payer() {
        let reg = NonceRegistry::new();
        let a = PartyId::random();
        let b = PartyId::random();
        reg.slot(a).lock().consume(1).unwrap();
        reg.slot(b).lock().consume(1).unwrap();
        assert!(!reg.is_used(&a, 2));
        assert_eq!(reg.count(&a), 1);
        assert_eq!(reg.count(&PartyId::random()), 0);
    }

    #[test]
    fn slots_lock_independently() {
        let reg = NonceRegistry::new();
        let a = PartyId::random();
        let b = PartyId::random();
        let slot_a = reg.slot(a);
        let _held = slot_a.lock();

        assert!(reg.slot(b).try_lock().is_some());
        assert!(reg.slot(a).try_lock().is_none());
        assert!(Arc::ptr_eq(&reg.slot(a), &slot_a));
    }
}
