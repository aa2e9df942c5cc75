//! Rail-side status of a single transfer.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐ prepare  ┌──────────┐ release  ┌──────────┐
//!   │ NONE ├─────────▶│ PREPARED ├─────────▶│ RELEASED │
//!   └──┬───┘          └────┬─────┘          └──────────┘
//!      │ void              │ refund
//!      ▼                   ▼
//!   ┌───────────┐     ┌──────────┐
//!   │ CANCELLED │     │ REFUNDED │
//!   └───────────┘     └──────────┘
//! ```
//!
//! Transitions are monotonic. Every status other than `NONE` and
//! `PREPARED` is terminal.

use serde::{Deserialize, Serialize};

/// Lifecycle of a transfer inside one rail, keyed by `TransferId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RailStatus {
    /// Never seen by this rail.
    #[default]
    None,
    /// Payer value is held in rail custody.
    Prepared,
    /// Escrowed value went to the payee. **Irreversible.**
    Released,
    /// Escrowed value went back to the payer. **Irreversible.**
    Refunded,
    /// Voided before it was ever prepared; blocks a later prepare.
    Cancelled,
}

impl RailStatus {
    /// Can a transfer in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::None, Self::Prepared | Self::Cancelled)
                | (Self::Prepared, Self::Released | Self::Refunded)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded | Self::Cancelled)
    }
}

impl std::fmt::Display for RailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}
