//! Custody ledger: the collaborator that actually moves value.
//!
//! Rails and the direct escrow engine never hold balances themselves; they
//! ask a [`Ledger`] to move value between parties. Two movement modes exist:
//!
//! - [`Ledger::transfer_from`]: a spender pulls from an owner against the
//!   owner's pre-approved allowance (the ordinary escrow pull).
//! - [`Ledger::transfer`]: the owner itself moves value (custody paying out,
//!   or a pull already authorized by a verified signature).
//!
//! [`InMemoryLedger`] is the reference implementation. Every mutation is
//! atomic: either the full movement happens or nothing changes.

use std::collections::HashMap;

use opensettle_types::{AssetId, PartyId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors reported by a ledger backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient {asset} balance for {owner}: need {needed}, have {available}")]
    InsufficientBalance {
        owner: PartyId,
        asset: AssetId,
        needed: Decimal,
        available: Decimal,
    },

    #[error("insufficient {asset} allowance from {owner} to {spender}: need {needed}, approved {approved}")]
    InsufficientAllowance {
        owner: PartyId,
        spender: PartyId,
        asset: AssetId,
        needed: Decimal,
        approved: Decimal,
    },

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),
}

/// A backend able to move fungible amounts and discrete items between parties.
pub trait Ledger: Send + Sync {
    /// Move `amount` of `asset` from `from` to `to`, consuming `spender`'s
    /// allowance from `from`.
    fn transfer_from(
        &self,
        spender: &PartyId,
        asset: &AssetId,
        from: &PartyId,
        to: &PartyId,
        amount: Decimal,
    ) -> Result<(), LedgerError>;

    /// Move `amount` of `asset` from `from` to `to` on `from`'s own authority.
    fn transfer(
        &self,
        asset: &AssetId,
        from: &PartyId,
        to: &PartyId,
        amount: Decimal,
    ) -> Result<(), LedgerError>;

    /// Current balance of `owner` in `asset`.
    fn balance(&self, owner: &PartyId, asset: &AssetId) -> Decimal;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<(PartyId, AssetId), Decimal>,
    /// `(owner, spender, asset) → approved amount`.
    allowances: HashMap<(PartyId, PartyId, AssetId), Decimal>,
    /// Total minted per asset since genesis.
    minted: HashMap<AssetId, Decimal>,
}

impl LedgerState {
    fn available(&self, owner: &PartyId, asset: &AssetId) -> Decimal {
        self.balances
            .get(&(*owner, asset.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn ensure_balance(
        &self,
        owner: &PartyId,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let available = self.available(owner, asset);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                owner: *owner,
                asset: asset.clone(),
                needed: amount,
                available,
            });
        }
        Ok(())
    }

    fn move_value(&mut self, asset: &AssetId, from: &PartyId, to: &PartyId, amount: Decimal) {
        *self
            .balances
            .entry((*from, asset.clone()))
            .or_insert(Decimal::ZERO) -= amount;
        *self
            .balances
            .entry((*to, asset.clone()))
            .or_insert(Decimal::ZERO) += amount;
    }
}

/// Thread-safe in-memory ledger with balances and allowances.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `amount` of `asset` for `owner` (deposit into the ledger).
    pub fn mint(&self, owner: PartyId, asset: &AssetId, amount: Decimal) {
        let mut state = self.state.lock();
        *state
            .balances
            .entry((owner, asset.clone()))
            .or_insert(Decimal::ZERO) += amount;
        *state.minted.entry(asset.clone()).or_insert(Decimal::ZERO) += amount;
    }

    /// Set the allowance `spender` may pull from `owner` (overwrites).
    pub fn approve(&self, owner: PartyId, spender: PartyId, asset: &AssetId, amount: Decimal) {
        self.state
            .lock()
            .allowances
            .insert((owner, spender, asset.clone()), amount);
    }

    #[must_use]
    pub fn allowance(&self, owner: &PartyId, spender: &PartyId, asset: &AssetId) -> Decimal {
        self.state
            .lock()
            .allowances
            .get(&(*owner, *spender, asset.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of every party's balance in `asset`.
    #[must_use]
    pub fn total_supply(&self, asset: &AssetId) -> Decimal {
        self.state
            .lock()
            .balances
            .iter()
            .filter(|((_, a), _)| a == asset)
            .map(|(_, amount)| *amount)
            .sum()
    }

    /// Total ever minted for `asset`. Equal to [`Self::total_supply`]
    /// unless value was created or destroyed by a bug.
    #[must_use]
    pub fn minted(&self, asset: &AssetId) -> Decimal {
        self.state
            .lock()
            .minted
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Ledger for InMemoryLedger {
    fn transfer_from(
        &self,
        spender: &PartyId,
        asset: &AssetId,
        from: &PartyId,
        to: &PartyId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.ensure_balance(from, asset, amount)?;

        let key = (*from, *spender, asset.clone());
        let approved = state.allowances.get(&key).copied().unwrap_or(Decimal::ZERO);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                asset: asset.clone(),
                needed: amount,
                approved,
            });
        }

        state.allowances.insert(key, approved - amount);
        state.move_value(asset, from, to, amount);
        Ok(())
    }

    fn transfer(
        &self,
        asset: &AssetId,
        from: &PartyId,
        to: &PartyId,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.ensure_balance(from, asset, amount)?;
        state.move_value(asset, from, to, amount);
        Ok(())
    }

    fn balance(&self, owner: &PartyId, asset: &AssetId) -> Decimal {
        self.state.lock().available(owner, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::fungible("USDC")
    }

    #[test]
    fn mint_increases_balance_and_supply() {
        let ledger = InMemoryLedger::new();
        let user = PartyId::random();
        ledger.mint(user, &usdc(), Decimal::new(1000, 0));
        assert_eq!(ledger.balance(&user, &usdc()), Decimal::new(1000, 0));
        assert_eq!(ledger.total_supply(&usdc()), Decimal::new(1000, 0));
        assert_eq!(ledger.minted(&usdc()), Decimal::new(1000, 0));
    }

    #[test]
    fn transfer_moves_value() {
        let ledger = InMemoryLedger::new();
        let a = PartyId::random();
        let b = PartyId::random();
        ledger.mint(a, &usdc(), Decimal::new(1000, 0));
        ledger.transfer(&usdc(), &a, &b, Decimal::new(400, 0)).unwrap();
        assert_eq!(ledger.balance(&a, &usdc()), Decimal::new(600, 0));
        assert_eq!(ledger.balance(&b, &usdc()), Decimal::new(400, 0));
        assert_eq!(ledger.total_supply(&usdc()), ledger.minted(&usdc()));
    }

    #[test]
    fn transfer_insufficient_fails_without_change() {
        let ledger = InMemoryLedger::new();
        let a = PartyId::random();
        let b = PartyId::random();
        ledger.mint(a, &usdc(), Decimal::new(100, 0));
        let err = ledger
            .transfer(&usdc(), &a, &b, Decimal::new(200, 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance(&a, &usdc()), Decimal::new(100, 0));
        assert_eq!(ledger.balance(&b, &usdc()), Decimal::ZERO);
    }

    #[test]
    fn transfer_from_consumes_allowance() {
        let ledger = InMemoryLedger::new();
        let owner = PartyId::random();
        let spender = PartyId::random();
        ledger.mint(owner, &usdc(), Decimal::new(1000, 0));
        ledger.approve(owner, spender, &usdc(), Decimal::new(700, 0));

        ledger
            .transfer_from(&spender, &usdc(), &owner, &spender, Decimal::new(500, 0))
            .unwrap();
        assert_eq!(ledger.allowance(&owner, &spender, &usdc()), Decimal::new(200, 0));
        assert_eq!(ledger.balance(&spender, &usdc()), Decimal::new(500, 0));

        let err = ledger
            .transfer_from(&spender, &usdc(), &owner, &spender, Decimal::new(300, 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { .. }));
        assert_eq!(ledger.balance(&owner, &usdc()), Decimal::new(500, 0));
    }

    #[test]
    fn transfer_from_without_approval_fails() {
        let ledger = InMemoryLedger::new();
        let owner = PartyId::random();
        let spender = PartyId::random();
        ledger.mint(owner, &usdc(), Decimal::new(1000, 0));
        let err = ledger
            .transfer_from(&spender, &usdc(), &owner, &spender, Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { .. }));
    }

    #[test]
    fn non_positive_amount_rejected() {
        let ledger = InMemoryLedger::new();
        let a = PartyId::random();
        ledger.mint(a, &usdc(), Decimal::new(10, 0));
        let err = ledger
            .transfer(&usdc(), &a, &PartyId::random(), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidAmount(Decimal::ZERO));
    }

    #[test]
    fn items_are_balances_of_one() {
        let ledger = InMemoryLedger::new();
        let seller = PartyId::random();
        let buyer = PartyId::random();
        let punk = AssetId::item("PUNKS", 42);
        ledger.mint(seller, &punk, Decimal::ONE);
        ledger.transfer(&punk, &seller, &buyer, Decimal::ONE).unwrap();
        assert_eq!(ledger.balance(&buyer, &punk), Decimal::ONE);
        assert!(ledger.transfer(&punk, &seller, &buyer, Decimal::ONE).is_err());
    }
}
