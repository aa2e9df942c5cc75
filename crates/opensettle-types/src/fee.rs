//! Settlement fee configuration and the fee split rule.
//!
//! ```text
//! fee = floor(gross * basis_points / 10_000)
//! net = gross - fee
//! ```
//!
//! The fee is cut from the payout, never added on top, and always rounds
//! down so the payee is never short-changed by rounding.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{PartyId, Result, SettleError, constants};

/// Fee rate and the party that collects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub basis_points: u32,
    pub recipient: PartyId,
}

/// A gross payout split into what the payee and the fee recipient receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub net: Decimal,
    pub fee: Decimal,
}

impl FeeConfig {
    /// A zero fee paid to `recipient`.
    #[must_use]
    pub fn zero(recipient: PartyId) -> Self {
        Self {
            basis_points: 0,
            recipient,
        }
    }

    /// Validate and build a fee configuration.
    ///
    /// # Errors
    /// Returns [`SettleError::FeeConfigInvalid`] above [`constants::FEE_BPS_CAP`].
    pub fn new(basis_points: u32, recipient: PartyId) -> Result<Self> {
        let cfg = Self {
            basis_points,
            recipient,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.basis_points > constants::FEE_BPS_CAP {
            return Err(SettleError::FeeConfigInvalid {
                bps: self.basis_points,
                cap: constants::FEE_BPS_CAP,
            });
        }
        Ok(())
    }

    /// Split a gross payout.
    #[must_use]
    pub fn split(&self, gross: Decimal) -> FeeSplit {
        let fee = (gross * Decimal::from(self.basis_points)
            / Decimal::from(constants::BPS_DENOMINATOR))
        .floor();
        FeeSplit {
            net: gross - fee,
            fee,
        }
    }
}
