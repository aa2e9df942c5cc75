//! Error types for OpenSettle.
//!
//! All errors use the `OS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Record errors (deals, instructions)
//! - 2xx: Deadline errors
//! - 3xx: Funding / transfer errors
//! - 4xx: Authorization errors
//! - 5xx: Compliance errors
//! - 6xx: Rail errors
//! - 7xx: Fee errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{PartyId, RailKey};

/// Central error enum for all OpenSettle operations.
#[derive(Debug, Error)]
pub enum SettleError {
    // =================================================================
    // Record Errors (1xx)
    // =================================================================
    /// The requested deal, instruction or transfer does not exist.
    #[error("OS_ERR_100: Not found: {0}")]
    NotFound(String),

    /// A record or transfer with this identifier already exists.
    #[error("OS_ERR_101: Already exists: {0}")]
    AlreadyExists(String),

    /// The operation is not legal from the record's current state.
    #[error("OS_ERR_102: Invalid state: {reason}")]
    InvalidState { reason: String },

    /// The instruction terms are malformed.
    #[error("OS_ERR_103: Invalid terms: {reason}")]
    InvalidTerms { reason: String },

    /// The requested deadline is beyond the configured maximum lifetime.
    #[error("OS_ERR_104: Invalid deadline: {reason}")]
    InvalidDeadline { reason: String },

    // =================================================================
    // Deadline Errors (2xx)
    // =================================================================
    /// The record's deadline has passed.
    #[error("OS_ERR_200: Deadline expired: {0}")]
    DeadlineExpired(String),

    /// The caller may only act once the deadline has passed.
    #[error("OS_ERR_201: Deadline not reached: {0}")]
    DeadlineNotReached(String),

    // =================================================================
    // Funding Errors (3xx)
    // =================================================================
    /// Funding amount differs from the amount the leg expects.
    #[error("OS_ERR_300: Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: Decimal, actual: Decimal },

    /// The backend could not move value (balance, allowance, gateway).
    #[error("OS_ERR_301: Transfer failed: {reason}")]
    TransferFailed { reason: String },

    /// The transfer descriptor is not acceptable for this rail.
    #[error("OS_ERR_302: Invalid transfer: {reason}")]
    InvalidTransfer { reason: String },

    // =================================================================
    // Authorization Errors (4xx)
    // =================================================================
    /// Caller is not the declared party or operator.
    #[error("OS_ERR_400: Unauthorized: {caller} {reason}")]
    Unauthorized { caller: PartyId, reason: String },

    /// The delegated authorization is past its expiry.
    #[error("OS_ERR_401: Authorization expired")]
    AuthorizationExpired,

    /// The delegated authorization signature did not verify.
    #[error("OS_ERR_402: Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// The authorization nonce was already consumed (replay).
    #[error("OS_ERR_403: Nonce {nonce} already used by {payer}")]
    NonceReused { payer: PartyId, nonce: u64 },

    // =================================================================
    // Compliance Errors (5xx)
    // =================================================================
    /// The compliance gate refused the funding action.
    #[error("OS_ERR_500: Compliance rejected: {reason}")]
    ComplianceRejected { reason: String },

    /// A party on the funding action is on the sanctions list.
    #[error("OS_ERR_501: Sanctioned party: {0}")]
    Sanctioned(PartyId),

    // =================================================================
    // Rail Errors (6xx)
    // =================================================================
    /// No rail is registered under this key.
    #[error("OS_ERR_600: Unknown rail: {0}")]
    UnknownRail(RailKey),

    /// A finalize or cancel decision was recorded but not every leg
    /// completed. Repeating the same operation resumes the outstanding legs.
    #[error("OS_ERR_601: Outcome incomplete for {record}: {reason}")]
    OutcomeIncomplete { record: String, reason: String },

    /// State was committed but a payout from custody failed.
    #[error("OS_ERR_602: Payout failed for {record}: {reason}")]
    PayoutFailed { record: String, reason: String },

    // =================================================================
    // Fee Errors (7xx)
    // =================================================================
    /// Fee basis points exceed the cap.
    #[error("OS_ERR_700: Fee configuration invalid: {bps} bps exceeds cap {cap}")]
    FeeConfigInvalid { bps: u32, cap: u32 },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("OS_ERR_900: Configuration error: {0}")]
    Configuration(String),

    /// Serialization / deserialization error.
    #[error("OS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Unrecoverable internal error.
    #[error("OS_ERR_902: Internal error: {0}")]
    Internal(String),
}

impl SettleError {
    /// Whether the failure left state mutated and must not be treated as
    /// a clean rejection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutcomeIncomplete { .. } | Self::PayoutFailed { .. } | Self::Internal(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, SettleError>;

impl From<serde_json::Error> for SettleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
