//! Sanctions oracle and a static list implementation.

use std::collections::HashSet;

use opensettle_types::PartyId;
use parking_lot::RwLock;

/// Host-provided sanctions lookup.
pub trait SanctionsOracle: Send + Sync {
    fn is_sanctioned(&self, party: &PartyId) -> bool;
}

/// A mutable in-memory sanctions list.
#[derive(Debug, Default)]
pub struct SanctionsList {
    parties: RwLock<HashSet<PartyId>>,
}

impl SanctionsList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, party: PartyId) {
        self.parties.write().insert(party);
    }

    /// Returns `true` if the party was listed.
    pub fn remove(&self, party: &PartyId) -> bool {
        self.parties.write().remove(party)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parties.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parties.read().is_empty()
    }
}

impl FromIterator<PartyId> for SanctionsList {
    fn from_iter<I: IntoIterator<Item = PartyId>>(iter: I) -> Self {
        Self {
            parties: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl SanctionsOracle for SanctionsList {
    fn is_sanctioned(&self, party: &PartyId) -> bool {
        self.parties.read().contains(party)
    }
}
