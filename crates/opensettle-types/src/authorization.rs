//! # Delegated authorization: a signed stand-in for pre-approval
//!
//! Instead of approving the escrow engine to pull funds in a separate step,
//! a payer can sign the exact transfer it consents to. The engine verifies
//! the signature against the payer's identity (its ed25519 public key) and
//! then treats the authorization as a direct funding call.
//!
//! ## Security Properties
//!
//! - **Transfer-bound**: the signature covers the transfer's content-addressed id
//! - **Nonce-bound**: each nonce is consumed once per payer, preventing replay
//! - **Time-bound**: rejected once `now > expiry`
//! - **Payer-bound**: the signer must be the transfer's payer

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::{PartyId, Result, SettleError, TransferDescriptor, constants};

/// A detached ed25519 authorization over `(payer, transfer, nonce, expiry)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedAuthorization {
    pub payer: PartyId,
    pub transfer: TransferDescriptor,
    pub nonce: u64,
    pub expiry: DateTime<Utc>,
    /// 64-byte ed25519 signature over [`Self::signing_payload`].
    pub signature: Vec<u8>,
}

impl DelegatedAuthorization {
    /// Canonical signing payload.
    ///
    /// Format: `"opensettle:auth:v1:" || payer || transfer_id || nonce_le || expiry_unix_le`
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        payload(&self.payer, &self.transfer, self.nonce, self.expiry)
    }

    /// Sign `transfer` with the payer's key.
    #[must_use]
    pub fn sign(
        key: &SigningKey,
        transfer: TransferDescriptor,
        nonce: u64,
        expiry: DateTime<Utc>,
    ) -> Self {
        let payer = PartyId::from(&key.verifying_key());
        let signature = key
            .sign(&payload(&payer, &transfer, nonce, expiry))
            .to_bytes()
            .to_vec();
        Self {
            payer,
            transfer,
            nonce,
            expiry,
            signature,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }

    /// Check expiry, payer binding and the signature.
    ///
    /// # Errors
    /// - [`SettleError::AuthorizationExpired`] past expiry
    /// - [`SettleError::InvalidSignature`] if the signer is not the payer or
    ///   the signature does not verify
    pub fn verify(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired(now) {
            return Err(SettleError::AuthorizationExpired);
        }
        if self.payer != self.transfer.payer {
            return Err(SettleError::InvalidSignature {
                reason: format!(
                    "signer {} is not the transfer payer {}",
                    self.payer, self.transfer.payer
                ),
            });
        }
        let signature =
            Signature::from_slice(&self.signature).map_err(|e| SettleError::InvalidSignature {
                reason: format!("malformed signature: {e}"),
            })?;
        self.payer
            .verifying_key()?
            .verify_strict(&self.signing_payload(), &signature)
            .map_err(|e| SettleError::InvalidSignature {
                reason: e.to_string(),
            })
    }
}

fn payload(
    payer: &PartyId,
    transfer: &TransferDescriptor,
    nonce: u64,
    expiry: DateTime<Utc>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(constants::AUTHORIZATION_DOMAIN.len() + 32 + 32 + 16);
    out.extend_from_slice(constants::AUTHORIZATION_DOMAIN);
    out.extend_from_slice(payer.as_bytes());
    out.extend_from_slice(transfer.derive_id().as_bytes());
    out.extend_from_slice(&nonce.to_le_bytes());
    out.extend_from_slice(&expiry.timestamp().to_le_bytes());
    out
}

/// Deterministic party key material for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
pub struct PartyKeys {
    pub signing: SigningKey,
    pub id: PartyId,
}

#[cfg(any(test, feature = "test-helpers"))]
impl PartyKeys {
    /// Keys derived from a fixed 32-byte seed filled with `seed`.
    pub fn from_seed(seed: u8) -> Self {
        let signing = SigningKey::from_bytes(&[seed; 32]);
        let id = PartyId::from(&signing.verifying_key());
        Self { signing, id }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use super::*;
    use crate::AssetId;

    fn transfer_from(payer: PartyId) -> TransferDescriptor {
        TransferDescriptor::new(
            AssetId::fungible("USDC"),
            payer,
            PartyId([0xcc; 32]),
            Decimal::new(1000, 0),
        )
    }

    #[test]
    fn signed_authorization_verifies() {
        let keys = PartyKeys::from_seed(1);
        let now = Utc::now();
        let auth = DelegatedAuthorization::sign(
            &keys.signing,
            transfer_from(keys.id),
            7,
            now + Duration::minutes(5),
        );
        assert_eq!(auth.payer, keys.id);
        assert!(auth.verify(now).is_ok());
    }

    #[test]
    fn expired_authorization_rejected() {
        let keys = PartyKeys::from_seed(1);
        let now = Utc::now();
        let auth = DelegatedAuthorization::sign(&keys.signing, transfer_from(keys.id), 7, now);
        assert!(auth.verify(now).is_ok(), "expiry is inclusive");
        let err = auth.verify(now + Duration::seconds(1)).unwrap_err();
        assert!(matches!(err, SettleError::AuthorizationExpired));
    }

    #[test]
    fn tampered_amount_rejected() {
        let keys = PartyKeys::from_seed(1);
        let now = Utc::now();
        let mut auth = DelegatedAuthorization::sign(
            &keys.signing,
            transfer_from(keys.id),
            7,
            now + Duration::minutes(5),
        );
        auth.transfer.amount = Decimal::new(1_000_000, 0);
        let err = auth.verify(now).unwrap_err();
        assert!(matches!(err, SettleError::InvalidSignature { .. }));
    }

    #[test]
    fn tampered_nonce_rejected() {
        let keys = PartyKeys::from_seed(1);
        let now = Utc::now();
        let mut auth = DelegatedAuthorization::sign(
            &keys.signing,
            transfer_from(keys.id),
            7,
            now + Duration::minutes(5),
        );
        auth.nonce = 8;
        assert!(matches!(
            auth.verify(now),
            Err(SettleError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn signature_by_other_key_rejected() {
        let payer = PartyKeys::from_seed(1);
        let thief = PartyKeys::from_seed(2);
        let now = Utc::now();
        let mut auth = DelegatedAuthorization::sign(
            &thief.signing,
            transfer_from(payer.id),
            7,
            now + Duration::minutes(5),
        );
        // Signer is not the payer.
        assert!(matches!(
            auth.verify(now),
            Err(SettleError::InvalidSignature { .. })
        ));
        // Claiming to be the payer does not help either.
        auth.payer = payer.id;
        assert!(matches!(
            auth.verify(now),
            Err(SettleError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn truncated_signature_rejected() {
        let keys = PartyKeys::from_seed(1);
        let now = Utc::now();
        let mut auth = DelegatedAuthorization::sign(
            &keys.signing,
            transfer_from(keys.id),
            7,
            now + Duration::minutes(5),
        );
        auth.signature.truncate(10);
        assert!(matches!(
            auth.verify(now),
            Err(SettleError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn serde_roundtrip_still_verifies() {
        let keys = PartyKeys::from_seed(3);
        let now = Utc::now();
        let auth = DelegatedAuthorization::sign(
            &keys.signing,
            transfer_from(keys.id),
            1,
            now + Duration::minutes(5),
        );
        let json = serde_json::to_string(&auth).unwrap();
        let back: DelegatedAuthorization = serde_json::from_str(&json).unwrap();
        assert!(back.verify(now).is_ok());
    }
}
