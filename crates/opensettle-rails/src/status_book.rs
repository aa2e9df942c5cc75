//! Per-rail status book: `TransferId → RailStatus` plus amount tallies.
//!
//! The book is the rail's double-escrow guard (a transfer id can be prepared
//! at most once, ever) and its conservation record:
//!
//! ```text
//! ∀ id: released(id) + refunded(id) ≤ prepared(id)
//!       with equality once status(id) is RELEASED or REFUNDED
//! ```
//!
//! Entries are never removed.

use std::collections::HashMap;

use opensettle_types::{RailStatus, Result, SettleError, TransferId};
use rust_decimal::Decimal;

/// Cumulative amounts moved for one transfer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferTally {
    pub prepared: Decimal,
    pub released: Decimal,
    pub refunded: Decimal,
}

impl TransferTally {
    /// Value still held in custody for this transfer.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        self.prepared - self.released - self.refunded
    }

    /// Does this tally satisfy conservation for a transfer in `status`?
    #[must_use]
    pub fn is_conserved(&self, status: RailStatus) -> bool {
        let out = self.released + self.refunded;
        match status {
            RailStatus::Released | RailStatus::Refunded => out == self.prepared,
            _ => out <= self.prepared,
        }
    }
}

/// Status and tallies for every transfer a rail has seen.
#[derive(Debug, Default)]
pub struct StatusBook {
    statuses: HashMap<TransferId, RailStatus>,
    tallies: HashMap<TransferId, TransferTally>,
}

impl StatusBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self, id: &TransferId) -> RailStatus {
        self.statuses.get(id).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn tally(&self, id: &TransferId) -> TransferTally {
        self.tallies.get(id).copied().unwrap_or_default()
    }

    /// Fail unless `id` may be prepared (status `NONE`).
    ///
    /// # Errors
    /// [`SettleError::AlreadyExists`] if the id has any other status.
    pub fn ensure_unseen(&self, id: &TransferId) -> Result<()> {
        match self.status(id) {
            RailStatus::None => Ok(()),
            status => Err(SettleError::AlreadyExists(format!("{id} is {status}"))),
        }
    }

    /// Fail unless `id` is `PREPARED`.
    ///
    /// # Errors
    /// [`SettleError::InvalidState`] otherwise.
    pub fn ensure_prepared(&self, id: &TransferId) -> Result<()> {
        match self.status(id) {
            RailStatus::Prepared => Ok(()),
            status => Err(SettleError::InvalidState {
                reason: format!("{id} is {status}, not PREPARED"),
            }),
        }
    }

    /// Record a transition and the amount it moved.
    ///
    /// # Errors
    /// [`SettleError::InvalidState`] if the transition is not monotonic.
    pub fn transition(&mut self, id: TransferId, target: RailStatus, amount: Decimal) -> Result<()> {
        let current = self.status(&id);
        if !current.can_transition_to(target) {
            return Err(SettleError::InvalidState {
                reason: format!("{id}: cannot transition from {current} to {target}"),
            });
        }
        self.statuses.insert(id, target);
        let tally = self.tallies.entry(id).or_default();
        match target {
            RailStatus::Prepared => tally.prepared += amount,
            RailStatus::Released => tally.released += amount,
            RailStatus::Refunded => tally.refunded += amount,
            RailStatus::None | RailStatus::Cancelled => {}
        }
        Ok(())
    }

    /// Number of transfer ids ever seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Check conservation for every transfer id.
    #[must_use]
    pub fn all_conserved(&self) -> bool {
        self.statuses
            .iter()
            .all(|(id, status)| self.tally(id).is_conserved(*status))
    }
}
