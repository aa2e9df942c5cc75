//! Preflight screen: sanctions first, then the compliance gate.
//!
//! Every fund-pulling path in the coordinator and the engine goes through
//! [`Preflight::screen`]. A rejection aborts the attempt before any value
//! moves.

use std::sync::Arc;

use opensettle_types::{AssetId, PartyId, Result, SettleError, TransferDescriptor};
use rust_decimal::Decimal;
use tracing::warn;

use crate::gate::{AllowAll, ComplianceGate, PreflightContext};
use crate::sanctions::{SanctionsList, SanctionsOracle};

/// Compliance gate plus sanctions oracle.
#[derive(Clone)]
pub struct Preflight {
    gate: Arc<dyn ComplianceGate>,
    sanctions: Arc<dyn SanctionsOracle>,
}

impl std::fmt::Debug for Preflight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preflight").finish_non_exhaustive()
    }
}

impl Default for Preflight {
    fn default() -> Self {
        Self::permissive()
    }
}

impl Preflight {
    #[must_use]
    pub fn new(gate: Arc<dyn ComplianceGate>, sanctions: Arc<dyn SanctionsOracle>) -> Self {
        Self { gate, sanctions }
    }

    /// Allow-all gate with an empty sanctions list.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new(Arc::new(AllowAll), Arc::new(SanctionsList::new()))
    }

    /// Screen one funding action.
    ///
    /// # Errors
    /// - [`SettleError::Sanctioned`] if either party is listed
    /// - [`SettleError::ComplianceRejected`] if the gate denies
    pub fn screen(
        &self,
        payer: &PartyId,
        payee: &PartyId,
        asset: &AssetId,
        amount: Decimal,
        ctx: &PreflightContext,
    ) -> Result<()> {
        for party in [payer, payee] {
            if self.sanctions.is_sanctioned(party) {
                warn!(record = %ctx.record, side = %ctx.side, party = %party, "Sanctioned party");
                return Err(SettleError::Sanctioned(*party));
            }
        }

        let decision = self.gate.check(payer, payee, asset, amount, ctx);
        if !decision.allowed {
            warn!(
                record = %ctx.record,
                side = %ctx.side,
                asset = %asset,
                amount = %amount,
                reason = %decision.reason,
                "Compliance rejected"
            );
            return Err(SettleError::ComplianceRejected {
                reason: decision.reason,
            });
        }
        Ok(())
    }

    /// Screen the movement described by `transfer`.
    ///
    /// # Errors
    /// As [`Self::screen`].
    pub fn screen_transfer(
        &self,
        transfer: &TransferDescriptor,
        ctx: &PreflightContext,
    ) -> Result<()> {
        self.screen(
            &transfer.payer,
            &transfer.payee,
            &transfer.asset_id,
            transfer.amount,
            ctx,
        )
    }
}
