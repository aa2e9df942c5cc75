//! # Deal: the two-phase, rail-mediated settlement record
//!
//! ## State Machine
//!
//! ```text
//!                 prepare A   ┌────────────┐  prepare B
//!            ┌───────────────▶│ PREPARED_A ├──────────────┐
//!   ┌──────┐ │                └────────────┘              ▼
//!   │ OPEN ├─┤                                     ┌───────────────┐ finalize ┌───────────┐
//!   └──────┘ │                ┌────────────┐       │ PREPARED_BOTH ├─────────▶│ FINALIZED │
//!            └───────────────▶│ PREPARED_B ├──────▶└───────────────┘          └───────────┘
//!                 prepare B   └────────────┘  prepare A
//!
//!   any non-terminal ──cancel (before deadline)──▶ CANCELLED
//!   any non-terminal ──cancel (after deadline)───▶ EXPIRED
//! ```
//!
//! A deal references its rails only by [`RailKey`]; the coordinator
//! resolves them through the registry on every operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DealId, LegFlags, LegSide, PartyId, RailKey, TransferDescriptor, TransferId};

/// One leg of a deal: a transfer and the rail that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub rail: RailKey,
    pub transfer: TransferDescriptor,
}

impl Leg {
    #[must_use]
    pub fn new(rail: RailKey, transfer: TransferDescriptor) -> Self {
        Self { rail, transfer }
    }

    #[must_use]
    pub fn transfer_id(&self) -> TransferId {
        self.transfer.derive_id()
    }
}

/// The lifecycle state of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealState {
    Open,
    PreparedA,
    PreparedB,
    PreparedBoth,
    Finalized,
    Cancelled,
    Expired,
}

impl DealState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Expired)
    }

    /// Has `side` been prepared in this state?
    #[must_use]
    pub fn is_prepared(&self, side: LegSide) -> bool {
        match self {
            Self::PreparedA => side == LegSide::A,
            Self::PreparedB => side == LegSide::B,
            Self::PreparedBoth => true,
            _ => false,
        }
    }

    /// The state reached after preparing `side`, or `None` if preparing
    /// `side` is not legal from here.
    #[must_use]
    pub fn after_prepare(&self, side: LegSide) -> Option<Self> {
        match (self, side) {
            (Self::Open, LegSide::A) => Some(Self::PreparedA),
            (Self::Open, LegSide::B) => Some(Self::PreparedB),
            (Self::PreparedA, LegSide::B) | (Self::PreparedB, LegSide::A) => {
                Some(Self::PreparedBoth)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for DealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::PreparedA => write!(f, "PREPARED_A"),
            Self::PreparedB => write!(f, "PREPARED_B"),
            Self::PreparedBoth => write!(f, "PREPARED_BOTH"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A two-leg deal held by the settlement coordinator. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub state: DealState,
    /// The party that opened the deal.
    pub operator: PartyId,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub leg_a: Leg,
    pub leg_b: Leg,
    /// Terminal outcome the coordinator committed to. Set before the first
    /// rail side effect of `finalize` or `cancel`; once set, only that
    /// outcome can complete.
    pub decision: Option<DealState>,
    /// Legs whose rail already reached the decided outcome.
    pub completed: LegFlags,
}

impl Deal {
    #[must_use]
    pub fn new(
        id: DealId,
        operator: PartyId,
        leg_a: Leg,
        leg_b: Leg,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            state: DealState::Open,
            operator,
            created_at,
            deadline,
            leg_a,
            leg_b,
            decision: None,
            completed: LegFlags::default(),
        }
    }

    #[must_use]
    pub fn leg(&self, side: LegSide) -> &Leg {
        match side {
            LegSide::A => &self.leg_a,
            LegSide::B => &self.leg_b,
        }
    }

    /// `true` once `now` is strictly past the deadline.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Operator, or payer/payee of either leg.
    #[must_use]
    pub fn is_participant(&self, party: &PartyId) -> bool {
        *party == self.operator
            || [&self.leg_a, &self.leg_b]
                .iter()
                .any(|leg| leg.transfer.payer == *party || leg.transfer.payee == *party)
    }

    /// Operator, or the payer of `side`.
    #[must_use]
    pub fn may_prepare(&self, party: &PartyId, side: LegSide) -> bool {
        *party == self.operator || self.leg(side).transfer.payer == *party
    }

    #[must_use]
    pub fn prepared(&self) -> LegFlags {
        LegFlags {
            a: self.state.is_prepared(LegSide::A),
            b: self.state.is_prepared(LegSide::B),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use super::*;
    use crate::AssetId;

    fn make_deal() -> Deal {
        let p1 = PartyId([1u8; 32]);
        let p2 = PartyId([2u8; 32]);
        let now = Utc::now();
        Deal::new(
            DealId::new(),
            PartyId([9u8; 32]),
            Leg::new(
                RailKey::new("x"),
                TransferDescriptor::new(AssetId::fungible("X"), p1, p2, Decimal::new(1000, 0)),
            ),
            Leg::new(
                RailKey::new("y"),
                TransferDescriptor::new(AssetId::fungible("Y"), p2, p1, Decimal::new(2000, 0)),
            ),
            now,
            now + Duration::hours(1),
        )
    }

    #[test]
    fn prepare_transitions() {
        assert_eq!(
            DealState::Open.after_prepare(LegSide::A),
            Some(DealState::PreparedA)
        );
        assert_eq!(
            DealState::Open.after_prepare(LegSide::B),
            Some(DealState::PreparedB)
        );
        assert_eq!(
            DealState::PreparedA.after_prepare(LegSide::B),
            Some(DealState::PreparedBoth)
        );
        assert_eq!(
            DealState::PreparedB.after_prepare(LegSide::A),
            Some(DealState::PreparedBoth)
        );
    }

    #[test]
    fn double_prepare_not_legal() {
        assert_eq!(DealState::PreparedA.after_prepare(LegSide::A), None);
        assert_eq!(DealState::PreparedBoth.after_prepare(LegSide::A), None);
        assert_eq!(DealState::Finalized.after_prepare(LegSide::B), None);
        assert_eq!(DealState::Expired.after_prepare(LegSide::A), None);
    }

    #[test]
    fn terminal_states() {
        assert!(DealState::Finalized.is_terminal());
        assert!(DealState::Cancelled.is_terminal());
        assert!(DealState::Expired.is_terminal());
        assert!(!DealState::PreparedBoth.is_terminal());
    }

    #[test]
    fn participants_and_preparers() {
        let deal = make_deal();
        let p1 = PartyId([1u8; 32]);
        let p2 = PartyId([2u8; 32]);
        let stranger = PartyId([7u8; 32]);
        assert!(deal.is_participant(&p1));
        assert!(deal.is_participant(&deal.operator));
        assert!(!deal.is_participant(&stranger));

        assert!(deal.may_prepare(&p1, LegSide::A));
        assert!(!deal.may_prepare(&p1, LegSide::B));
        assert!(deal.may_prepare(&p2, LegSide::B));
        assert!(deal.may_prepare(&deal.operator, LegSide::B));
    }

    #[test]
    fn expiry_is_strict() {
        let deal = make_deal();
        assert!(!deal.is_expired(deal.deadline));
        assert!(deal.is_expired(deal.deadline + Duration::seconds(1)));
    }

    #[test]
    fn serde_roundtrip() {
        let deal = make_deal();
        let json = serde_json::to_string(&deal).unwrap();
        let back: Deal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, deal.id);
        assert_eq!(back.state, DealState::Open);
        assert_eq!(back.leg_b, deal.leg_b);
    }
}
