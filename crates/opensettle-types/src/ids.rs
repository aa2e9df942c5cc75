//! Identifiers used throughout OpenSettle.
//!
//! Record IDs (`DealId`, `InstructionId`) are UUIDv7 chosen by the caller.
//! `PartyId` is the party's raw ed25519 public key, so the identity of a
//! party is also the key its delegated authorizations are verified against.
//! `TransferId` is content-addressed (see [`crate::TransferDescriptor`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, SettleError};

// ---------------------------------------------------------------------------
// PartyId
// ---------------------------------------------------------------------------

/// A settlement participant: payer, payee, operator, custody or fee recipient.
/// This is the raw ed25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PartyId(pub [u8; 32]);

impl PartyId {
    #[must_use]
    pub fn from_pubkey(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Interpret this identity as an ed25519 verifying key.
    ///
    /// # Errors
    /// Returns [`SettleError::InvalidSignature`] if the bytes are not a valid
    /// curve point.
    pub fn verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey> {
        ed25519_dalek::VerifyingKey::from_bytes(&self.0).map_err(|e| {
            SettleError::InvalidSignature {
                reason: format!("party {self} is not a valid ed25519 key: {e}"),
            }
        })
    }
}

impl From<&ed25519_dalek::VerifyingKey> for PartyId {
    fn from(key: &ed25519_dalek::VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "party:{}", hex::encode(&self.0[..8]))
    }
}

// ---------------------------------------------------------------------------
// DealId / InstructionId
// ---------------------------------------------------------------------------

/// Identifier of a two-phase deal held by the settlement coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DealId(pub Uuid);

impl DealId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DealId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deal:{}", self.0)
    }
}

/// Identifier of a direct escrow instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct InstructionId(pub Uuid);

impl InstructionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for InstructionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ins:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RailKey
// ---------------------------------------------------------------------------

/// Registry key naming a rail backend (e.g. `"erc20-main"`, `"swift"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RailKey(pub String);

impl RailKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rail:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AssetId
// ---------------------------------------------------------------------------

/// An asset: a fungible symbol, or one discrete item inside a collection.
///
/// `item = None` is fungible. `item = Some(n)` is item `n` of collection
/// `symbol`; it is unique when exactly one unit exists, semi-fungible
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AssetId {
    pub symbol: String,
    pub item: Option<u64>,
}

impl AssetId {
    #[must_use]
    pub fn fungible(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            item: None,
        }
    }

    #[must_use]
    pub fn item(collection: impl Into<String>, item: u64) -> Self {
        Self {
            symbol: collection.into(),
            item: Some(item),
        }
    }

    #[must_use]
    pub fn is_fungible(&self) -> bool {
        self.item.is_none()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item {
            Some(item) => write!(f, "{}#{item}", self.symbol),
            None => write!(f, "{}", self.symbol),
        }
    }
}

// ---------------------------------------------------------------------------
// TransferId
// ---------------------------------------------------------------------------

/// Content-addressed transfer identifier: SHA-256 over the canonical
/// encoding of a [`crate::TransferDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TransferId(pub [u8; 32]);

impl TransferId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", hex::encode(&self.0[..8]))
    }
}

/// Random party identity for unit tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl PartyId {
    pub fn random() -> Self {
        Self(rand::random::<[u8; 32]>())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
