//! Transfer descriptors and their content-addressed identifiers.
//!
//! A [`TransferDescriptor`] is the unit a rail escrows. Two descriptors with
//! identical fields always produce the same [`TransferId`]; that is what
//! stops the same logical movement from being escrowed twice.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AssetId, PartyId, TransferId, constants};

/// One movement of value from `payer` to `payee`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferDescriptor {
    /// What is moved.
    pub asset_id: AssetId,
    /// Who gives it up.
    pub payer: PartyId,
    /// Who receives it on release.
    pub payee: PartyId,
    /// Amount in whole base units (quantity for items).
    pub amount: Decimal,
    /// Opaque routing metadata carried to the backend.
    pub metadata: Vec<u8>,
}

impl TransferDescriptor {
    #[must_use]
    pub fn new(asset_id: AssetId, payer: PartyId, payee: PartyId, amount: Decimal) -> Self {
        Self {
            asset_id,
            payer,
            payee,
            amount,
            metadata: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Canonical byte encoding hashed by [`Self::derive_id`].
    ///
    /// Format: `domain || len(symbol) || symbol || item_tag [|| item] || payer
    /// || payee || len(amount) || amount || len(metadata) || metadata`.
    /// Lengths are u64 little-endian; the amount is normalized first so
    /// `1000` and `1000.00` encode identically.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let amount = self.amount.normalize().to_string();
        let mut out = Vec::with_capacity(
            constants::TRANSFER_ID_DOMAIN.len() + 128 + amount.len() + self.metadata.len(),
        );
        out.extend_from_slice(constants::TRANSFER_ID_DOMAIN);
        push_field(&mut out, self.asset_id.symbol.as_bytes());
        match self.asset_id.item {
            Some(item) => {
                out.push(1);
                out.extend_from_slice(&item.to_le_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(self.payer.as_bytes());
        out.extend_from_slice(self.payee.as_bytes());
        push_field(&mut out, amount.as_bytes());
        push_field(&mut out, &self.metadata);
        out
    }

    /// Deterministic identifier of this transfer.
    #[must_use]
    pub fn derive_id(&self) -> TransferId {
        let digest = Sha256::digest(self.canonical_bytes());
        TransferId(digest.into())
    }

    /// The same movement in reverse, used when escrowed value is refunded.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            asset_id: self.asset_id.clone(),
            payer: self.payee,
            payee: self.payer,
            amount: self.amount,
            metadata: self.metadata.clone(),
        }
    }
}

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}
