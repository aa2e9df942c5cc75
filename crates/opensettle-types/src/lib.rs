//! # opensettle-types
//!
//! Shared types, errors, and configuration for **OpenSettle**.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`PartyId`], [`DealId`], [`InstructionId`], [`RailKey`], [`AssetId`], [`TransferId`]
//! - **Transfer model**: [`TransferDescriptor`] with content-addressed [`TransferId`]
//! - **Rail model**: [`RailStatus`]
//! - **Two-phase model**: [`Deal`], [`DealState`], [`Leg`]
//! - **Direct escrow model**: [`Instruction`], [`InstructionKind`], [`InstructionTerms`], [`InstructionState`]
//! - **Sides**: [`LegSide`], [`LegFlags`]
//! - **Fees**: [`FeeConfig`], [`FeeSplit`]
//! - **Delegated authorization**: [`DelegatedAuthorization`]
//! - **Configuration**: [`SettlementConfig`], [`CoordinatorConfig`], [`EngineConfig`]
//! - **Errors**: [`SettleError`] with `OS_ERR_` prefix codes
//! - **Constants**: fee cap, lifetimes, hashing domains

pub mod authorization;
pub mod config;
pub mod constants;
pub mod deal;
pub mod error;
pub mod fee;
pub mod ids;
pub mod instruction;
pub mod rail_status;
pub mod side;
pub mod transfer;

// Re-export all primary types at crate root for ergonomic imports:
//   use opensettle_types::{Deal, TransferDescriptor, SettleError, ...};

pub use authorization::*;
pub use config::*;
pub use deal::*;
pub use error::*;
pub use fee::*;
pub use ids::*;
pub use instruction::*;
pub use rail_status::*;
pub use side::*;
pub use transfer::*;

// Constants are accessed via `opensettle_types::constants::FOO`
// (not re-exported to avoid name collisions).
