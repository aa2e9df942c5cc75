//! # opensettle-settlement
//!
//! Atomic two-party settlement.
//!
//! ## Components
//!
//! - [`SettlementCoordinator`]: two-phase hub driving a deal of two legs,
//!   each bound to a rail by key
//! - [`DirectEscrowEngine`]: self-custody PvP / unique DvP / quantified DvP
//!   with fees and delegated authorization
//! - [`RecordStore`]: keyed records with a mutex per record
//! - [`NonceRegistry`]: per-payer replay protection
//! - [`EscrowAccounting`]: custody conservation tracking
//!
//! ## Guarantees
//!
//! - Either both legs move or neither does; a partial outcome is reported
//!   as fatal and is resumable in the same direction
//! - Exactly one terminal state per record
//! - Every funding action is screened before value moves
//! - Custody in = paid out + fees + refunded, per asset

pub mod accounting;
pub mod coordinator;
pub mod escrow_engine;
pub mod nonce;
pub mod store;

pub use accounting::{AssetFlows, EscrowAccounting};
pub use coordinator::SettlementCoordinator;
pub use escrow_engine::DirectEscrowEngine;
pub use nonce::{NonceRegistry, PayerNonces};
pub use store::RecordStore;
