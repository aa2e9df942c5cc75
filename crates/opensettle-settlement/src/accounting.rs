//! Escrow conservation tracker for the direct escrow engine.
//!
//! Invariant checked against the custody balance:
//! ```text
//! ∀ asset: custody(asset) == escrowed_in - paid_out - fees - refunded
//! ```
//!
//! If the custody party is used by nothing but the engine, a mismatch means
//! value was created or lost.

use std::collections::{BTreeSet, HashMap};

use opensettle_types::{AssetId, Result, SettleError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cumulative custody movements for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetFlows {
    pub escrowed_in: Decimal,
    pub paid_out: Decimal,
    pub fees: Decimal,
    pub refunded: Decimal,
}

impl AssetFlows {
    /// What custody should still hold.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        self.escrowed_in - self.paid_out - self.fees - self.refunded
    }
}

/// Per-asset custody flows since the engine started.
#[derive(Debug, Clone, Default)]
pub struct EscrowAccounting {
    flows: HashMap<AssetId, AssetFlows>,
}

impl EscrowAccounting {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, asset: &AssetId) -> &mut AssetFlows {
        self.flows.entry(asset.clone()).or_default()
    }

    pub fn record_escrow(&mut self, asset: &AssetId, amount: Decimal) {
        self.entry(asset).escrowed_in += amount;
    }

    pub fn record_payout(&mut self, asset: &AssetId, amount: Decimal) {
        self.entry(asset).paid_out += amount;
    }

    pub fn record_fee(&mut self, asset: &AssetId, amount: Decimal) {
        self.entry(asset).fees += amount;
    }

    pub fn record_refund(&mut self, asset: &AssetId, amount: Decimal) {
        self.entry(asset).refunded += amount;
    }

    #[must_use]
    pub fn flows(&self, asset: &AssetId) -> AssetFlows {
        self.flows.get(asset).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn outstanding(&self, asset: &AssetId) -> Decimal {
        self.flows(asset).outstanding()
    }

    /// Compare the expected custody holding with what the ledger reports.
    ///
    /// # Errors
    /// [`SettleError::Internal`] if they differ.
    pub fn verify(&self, asset: &AssetId, custody_balance: Decimal) -> Result<()> {
        let flows = self.flows(asset);
        let expected = flows.outstanding();
        if custody_balance != expected {
            return Err(SettleError::Internal(format!(
                "conservation broken for {asset}: custody holds {custody_balance}, expected \
                 {expected} (in={}, out={}, fees={}, refunded={})",
                flows.escrowed_in, flows.paid_out, flows.fees, flows.refunded
            )));
        }
        Ok(())
    }

    /// Every asset that ever entered custody, sorted.
    #[must_use]
    pub fn tracked_assets(&self) -> Vec<AssetId> {
        self.flows
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::fungible("USDC")
    }

    #[test]
    fn empty_is_zero() {
        let acc = EscrowAccounting::new();
        assert_eq!(acc.outstanding(&usdc()), Decimal::ZERO);
        assert!(acc.verify(&usdc(), Decimal::ZERO).is_ok());
        assert!(acc.tracked_assets().is_empty());
    }

    #[test]
    fn settle_flow_balances() {
        let mut acc = EscrowAccounting::new();
        acc.record_escrow(&usdc(), Decimal::new(500, 0));
        acc.record_payout(&usdc(), Decimal::new(488, 0));
        acc.record_fee(&usdc(), Decimal::new(12, 0));
        assert_eq!(acc.outstanding(&usdc()), Decimal::ZERO);
        assert!(acc.verify(&usdc(), Decimal::ZERO).is_ok());
    }

    #[test]
    fn refund_flow_balances() {
        let mut acc = EscrowAccounting::new();
        acc.record_escrow(&usdc(), Decimal::new(1000, 0));
        assert!(acc.verify(&usdc(), Decimal::new(1000, 0)).is_ok());
        acc.record_refund(&usdc(), Decimal::new(1000, 0));
        assert!(acc.verify(&usdc(), Decimal::ZERO).is_ok());
    }

    #[test]
    fn mismatch_detected() {
        let mut acc = EscrowAccounting::new();
        acc.record_escrow(&usdc(), Decimal::new(100, 0));
        let err = acc.verify(&usdc(), Decimal::new(99, 0)).unwrap_err();
        assert!(matches!(err, SettleError::Internal(_)));
    }

    #[test]
    fn tracked_assets_sorted() {
        let mut acc = EscrowAccounting::new();
        acc.record_escrow(&AssetId::fungible("Y"), Decimal::ONE);
        acc.record_escrow(&AssetId::fungible("X"), Decimal::ONE);
        assert_eq!(
            acc.tracked_assets(),
            vec![AssetId::fungible("X"), AssetId::fungible("Y")]
        );
    }
}
