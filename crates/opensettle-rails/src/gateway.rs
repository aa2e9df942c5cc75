//! Off-chain gateway: the collaborator behind the external rail.
//!
//! An external rail does not custody value on a ledger it can inspect.
//! Instead it instructs an off-chain processor (bank, payment network) to
//! place a hold on prepare, settle the hold on release, and reverse it on
//! refund. [`InMemoryGateway`] is the reference implementation and supports
//! one-shot failure injection for exercising partial-failure handling.

use std::collections::HashMap;

use opensettle_types::{TransferDescriptor, TransferId};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors reported by an off-chain gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway rejected {id}: {reason}")]
    Rejected { id: TransferId, reason: String },

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Operations an off-chain processor exposes, keyed by transfer id.
pub trait OffChainGateway: Send + Sync {
    fn hold(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<(), GatewayError>;
    fn settle(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<(), GatewayError>;
    fn reverse(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<(), GatewayError>;
}

/// Status of a hold as seen by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Held,
    Settled,
    Reversed,
}

/// Which gateway operation a failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Hold,
    Settle,
    Reverse,
}

#[derive(Debug, Default)]
struct GatewayState {
    holds: HashMap<TransferId, HoldState>,
    failures: HashMap<GatewayOp, String>,
}

impl GatewayState {
    fn take_failure(&mut self, op: GatewayOp) -> Result<(), GatewayError> {
        match self.failures.remove(&op) {
            Some(reason) => Err(GatewayError::Unavailable(reason)),
            None => Ok(()),
        }
    }

    fn advance(&mut self, id: &TransferId, from: HoldState, to: HoldState) -> Result<(), GatewayError> {
        match self.holds.get(id) {
            Some(state) if *state == from => {
                self.holds.insert(*id, to);
                Ok(())
            }
            other => Err(GatewayError::Rejected {
                id: *id,
                reason: format!("hold is {other:?}, expected {from:?}"),
            }),
        }
    }
}

/// In-memory gateway that records holds.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `op` fail with [`GatewayError::Unavailable`].
    pub fn fail_next(&self, op: GatewayOp, reason: impl Into<String>) {
        self.state.lock().failures.insert(op, reason.into());
    }

    #[must_use]
    pub fn hold_state(&self, id: &TransferId) -> Option<HoldState> {
        self.state.lock().holds.get(id).copied()
    }
}

impl OffChainGateway for InMemoryGateway {
    fn hold(&self, id: &TransferId, _transfer: &TransferDescriptor) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure(GatewayOp::Hold)?;
        if state.holds.contains_key(id) {
            return Err(GatewayError::Rejected {
                id: *id,
                reason: "duplicate hold".into(),
            });
        }
        state.holds.insert(*id, HoldState::Held);
        Ok(())
    }

    fn settle(&self, id: &TransferId, _transfer: &TransferDescriptor) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure(GatewayOp::Settle)?;
        state.advance(id, HoldState::Held, HoldState::Settled)
    }

    fn reverse(&self, id: &TransferId, _transfer: &TransferDescriptor) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.take_failure(GatewayOp::Reverse)?;
        state.advance(id, HoldState::Held, HoldState::Reversed)
    }
}

#[cfg(test)]
mod tests {
    use opensettle_types::{AssetId, PartyId};
    use rust_decimal::Decimal;

    use super::*;

    fn wire() -> TransferDescriptor {
        TransferDescriptor::new(
            AssetId::fungible("EUR"),
            PartyId([1u8; 32]),
            PartyId([2u8; 32]),
            Decimal::new(250, 0),
        )
    }

    #[test]
    fn hold_then_settle() {
        let gw = InMemoryGateway::new();
        let t = wire();
        let id = t.derive_id();
        gw.hold(&id, &t).unwrap();
        assert_eq!(gw.hold_state(&id), Some(HoldState::Held));
        gw.settle(&id, &t).unwrap();
        assert_eq!(gw.hold_state(&id), Some(HoldState::Settled));
        assert!(gw.reverse(&id, &t).is_err());
    }

    #[test]
    fn duplicate_hold_rejected() {
        let gw = InMemoryGateway::new();
        let t = wire();
        let id = t.derive_id();
        gw.hold(&id, &t).unwrap();
        assert!(matches!(
            gw.hold(&id, &t),
            Err(GatewayError::Rejected { .. })
        ));
    }

    #[test]
    fn settle_without_hold_rejected() {
        let gw = InMemoryGateway::new();
        let t = wire();
        assert!(gw.settle(&t.derive_id(), &t).is_err());
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let gw = InMemoryGateway::new();
        let t = wire();
        let id = t.derive_id();
        gw.fail_next(GatewayOp::Hold, "maintenance window");
        assert_eq!(
            gw.hold(&id, &t),
            Err(GatewayError::Unavailable("maintenance window".into()))
        );
        assert_eq!(gw.hold_state(&id), None);
        gw.hold(&id, &t).unwrap();
        assert_eq!(gw.hold_state(&id), Some(HoldState::Held));
    }
}
