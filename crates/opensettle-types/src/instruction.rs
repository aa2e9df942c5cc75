//! # Instruction: the direct (self-custody) escrow record
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐ both sides funded ┌────────┐  settle  ┌─────────┐
//!   │ OPEN ├──────────────────▶│ FUNDED ├─────────▶│ SETTLED │
//!   └──┬───┘                   └───┬────┘          └─────────┘
//!      │ cancel                    │ cancel
//!      ▼                           ▼
//!   CANCELLED (before deadline) / EXPIRED (after deadline)
//! ```
//!
//! Side `A` is the first party's leg (the seller's item for DvP kinds),
//! side `B` the second party's leg (the buyer's price for DvP kinds).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AssetId, InstructionId, LegFlags, LegSide, PartyId, Result, SettleError, TransferDescriptor,
};

/// The three exchange kinds supported by the direct escrow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    /// PvP: fungible amount against fungible amount.
    FungibleForFungible,
    /// DvP: one unique item against a fungible price.
    UniqueForFungible,
    /// DvP: a quantity of a semi-fungible item against a fungible price.
    QuantifiedForFungible,
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FungibleForFungible => write!(f, "PVP"),
            Self::UniqueForFungible => write!(f, "DVP_UNIQUE"),
            Self::QuantifiedForFungible => write!(f, "DVP_QUANTIFIED"),
        }
    }
}

/// Kind-specific parties and assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionTerms {
    FungibleForFungible {
        party_a: PartyId,
        asset_a: AssetId,
        amount_a: Decimal,
        party_b: PartyId,
        asset_b: AssetId,
        amount_b: Decimal,
    },
    UniqueForFungible {
        seller: PartyId,
        item: AssetId,
        buyer: PartyId,
        price_asset: AssetId,
        price: Decimal,
    },
    QuantifiedForFungible {
        seller: PartyId,
        item: AssetId,
        quantity: u64,
        buyer: PartyId,
        price_asset: AssetId,
        price: Decimal,
    },
}

impl InstructionTerms {
    #[must_use]
    pub fn kind(&self) -> InstructionKind {
        match self {
            Self::FungibleForFungible { .. } => InstructionKind::FungibleForFungible,
            Self::UniqueForFungible { .. } => InstructionKind::UniqueForFungible,
            Self::QuantifiedForFungible { .. } => InstructionKind::QuantifiedForFungible,
        }
    }

    /// The party that owes `side`.
    #[must_use]
    pub fn party(&self, side: LegSide) -> PartyId {
        match (self, side) {
            (Self::FungibleForFungible { party_a, .. }, LegSide::A) => *party_a,
            (Self::FungibleForFungible { party_b, .. }, LegSide::B) => *party_b,
            (
                Self::UniqueForFungible { seller, .. } | Self::QuantifiedForFungible { seller, .. },
                LegSide::A,
            ) => *seller,
            (
                Self::UniqueForFungible { buyer, .. } | Self::QuantifiedForFungible { buyer, .. },
                LegSide::B,
            ) => *buyer,
        }
    }

    /// The asset escrowed on `side`.
    #[must_use]
    pub fn asset(&self, side: LegSide) -> &AssetId {
        match (self, side) {
            (Self::FungibleForFungible { asset_a, .. }, LegSide::A) => asset_a,
            (Self::FungibleForFungible { asset_b, .. }, LegSide::B) => asset_b,
            (
                Self::UniqueForFungible { item, .. } | Self::QuantifiedForFungible { item, .. },
                LegSide::A,
            ) => item,
            (
                Self::UniqueForFungible { price_asset, .. }
                | Self::QuantifiedForFungible { price_asset, .. },
                LegSide::B,
            ) => price_asset,
        }
    }

    /// The amount escrowed on `side` (quantity for an item side).
    #[must_use]
    pub fn amount(&self, side: LegSide) -> Decimal {
        match (self, side) {
            (Self::FungibleForFungible { amount_a, .. }, LegSide::A) => *amount_a,
            (Self::FungibleForFungible { amount_b, .. }, LegSide::B) => *amount_b,
            (Self::UniqueForFungible { .. }, LegSide::A) => Decimal::ONE,
            (Self::QuantifiedForFungible { quantity, .. }, LegSide::A) => Decimal::from(*quantity),
            (
                Self::UniqueForFungible { price, .. } | Self::QuantifiedForFungible { price, .. },
                LegSide::B,
            ) => *price,
        }
    }

    /// `true` for the item leg of a DvP kind.
    #[must_use]
    pub fn is_item_side(&self, side: LegSide) -> bool {
        side == LegSide::A && self.kind() != InstructionKind::FungibleForFungible
    }

    /// Structural validation performed before an instruction is created.
    ///
    /// # Errors
    /// Returns [`SettleError::InvalidTerms`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| SettleError::InvalidTerms {
            reason: reason.to_string(),
        };

        if self.party(LegSide::A) == self.party(LegSide::B) {
            return Err(invalid("both sides name the same party"));
        }
        for side in LegSide::BOTH {
            if self.amount(side) <= Decimal::ZERO {
                return Err(invalid(&format!("side {side} amount must be positive")));
            }
        }
        match self {
            Self::FungibleForFungible {
                asset_a, asset_b, ..
            } => {
                if !asset_a.is_fungible() || !asset_b.is_fungible() {
                    return Err(invalid("PvP legs must both be fungible assets"));
                }
            }
            Self::UniqueForFungible {
                item, price_asset, ..
            } => {
                if item.is_fungible() {
                    return Err(invalid("item leg must name an item id"));
                }
                if !price_asset.is_fungible() {
                    return Err(invalid("price leg must be a fungible asset"));
                }
            }
            Self::QuantifiedForFungible {
                item, price_asset, ..
            } => {
                if item.is_fungible() {
                    return Err(invalid("item leg must name an item id"));
                }
                if !price_asset.is_fungible() {
                    return Err(invalid("price leg must be a fungible asset"));
                }
            }
        }
        Ok(())
    }
}

/// The lifecycle state of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionState {
    Open,
    Funded,
    Settled,
    Cancelled,
    Expired,
}

impl InstructionState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for InstructionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Funded => write!(f, "FUNDED"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// A direct escrow instruction held by the engine. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub terms: InstructionTerms,
    pub state: InstructionState,
    /// The party that created the instruction.
    pub operator: PartyId,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Sides whose value is held in engine custody.
    pub funded: LegFlags,
}

impl Instruction {
    #[must_use]
    pub fn new(
        id: InstructionId,
        terms: InstructionTerms,
        operator: PartyId,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            terms,
            state: InstructionState::Open,
            operator,
            created_at,
            deadline,
            funded: LegFlags::default(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> InstructionKind {
        self.terms.kind()
    }

    /// `true` while any side's value sits in custody.
    #[must_use]
    pub fn escrowed(&self) -> bool {
        !self.state.is_terminal() && self.funded.any()
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Operator or either declared party.
    #[must_use]
    pub fn is_participant(&self, party: &PartyId) -> bool {
        *party == self.operator
            || *party == self.terms.party(LegSide::A)
            || *party == self.terms.party(LegSide::B)
    }

    /// The transfer that escrows `side` into `custody`. Its metadata binds
    /// it to this instruction, so a signed authorization for it cannot be
    /// replayed against another instruction.
    #[must_use]
    pub fn escrow_transfer(&self, side: LegSide, custody: PartyId) -> TransferDescriptor {
        TransferDescriptor::new(
            self.terms.asset(side).clone(),
            self.terms.party(side),
            custody,
            self.terms.amount(side),
        )
        .with_metadata(self.id.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvp() -> InstructionTerms {
        InstructionTerms::FungibleForFungible {
            party_a: PartyId([1u8; 32]),
            asset_a: AssetId::fungible("X"),
            amount_a: Decimal::new(1000, 0),
            party_b: PartyId([2u8; 32]),
            asset_b: AssetId::fungible("Y"),
            amount_b: Decimal::new(2000, 0),
        }
    }

    fn dvp_quantified() -> InstructionTerms {
        InstructionTerms::QuantifiedForFungible {
            seller: PartyId([1u8; 32]),
            item: AssetId::item("GAME", 7),
            quantity: 25,
            buyer: PartyId([2u8; 32]),
            price_asset: AssetId::fungible("USDC"),
            price: Decimal::new(300, 0),
        }
    }

    #[test]
    fn pvp_accessors() {
        let t = pvp();
        assert_eq!(t.kind(), InstructionKind::FungibleForFungible);
        assert_eq!(t.party(LegSide::B), PartyId([2u8; 32]));
        assert_eq!(t.asset(LegSide::A), &AssetId::fungible("X"));
        assert_eq!(t.amount(LegSide::B), Decimal::new(2000, 0));
        assert!(!t.is_item_side(LegSide::A));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn dvp_item_side_amount_is_quantity() {
        let t = dvp_quantified();
        assert_eq!(t.amount(LegSide::A), Decimal::from(25u64));
        assert!(t.is_item_side(LegSide::A));
        assert!(!t.is_item_side(LegSide::B));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn unique_item_amount_is_one() {
        let t = InstructionTerms::UniqueForFungible {
            seller: PartyId([1u8; 32]),
            item: AssetId::item("PUNKS", 42),
            buyer: PartyId([2u8; 32]),
            price_asset: AssetId::fungible("USDC"),
            price: Decimal::new(500, 0),
        };
        assert_eq!(t.amount(LegSide::A), Decimal::ONE);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_terms() {
        let mut t = pvp();
        if let InstructionTerms::FungibleForFungible { party_b, .. } = &mut t {
            *party_b = PartyId([1u8; 32]);
        }
        assert!(matches!(
            t.validate(),
            Err(SettleError::InvalidTerms { .. })
        ));

        let mut t = pvp();
        if let InstructionTerms::FungibleForFungible { amount_a, .. } = &mut t {
            *amount_a = Decimal::ZERO;
        }
        assert!(t.validate().is_err());

        let mut t = dvp_quantified();
        if let InstructionTerms::QuantifiedForFungible { quantity, .. } = &mut t {
            *quantity = 0;
        }
        assert!(t.validate().is_err());

        let mut t = dvp_quantified();
        if let InstructionTerms::QuantifiedForFungible { item, .. } = &mut t {
            *item = AssetId::fungible("GAME");
        }
        assert!(t.validate().is_err());
    }

    #[test]
    fn escrow_transfer_binds_instruction() {
        let now = Utc::now();
        let custody = PartyId([0xcc; 32]);
        let a = Instruction::new(InstructionId::new(), pvp(), PartyId([9u8; 32]), now, now);
        let b = Instruction::new(InstructionId::new(), pvp(), PartyId([9u8; 32]), now, now);
        let ta = a.escrow_transfer(LegSide::A, custody);
        assert_eq!(ta.payer, PartyId([1u8; 32]));
        assert_eq!(ta.payee, custody);
        assert_ne!(
            ta.derive_id(),
            b.escrow_transfer(LegSide::A, custody).derive_id()
        );
    }

    #[test]
    fn escrowed_tracks_funding() {
        let now = Utc::now();
        let mut ins = Instruction::new(InstructionId::new(), pvp(), PartyId([9u8; 32]), now, now);
        assert!(!ins.escrowed());
        ins.funded.set(LegSide::A);
        assert!(ins.escrowed());
        ins.state = InstructionState::Cancelled;
        assert!(!ins.escrowed());
    }
}
