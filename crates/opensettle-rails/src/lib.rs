//! # opensettle-rails
//!
//! Settlement rails and the collaborators they move value through.
//!
//! ## Components
//!
//! - [`Ledger`] / [`InMemoryLedger`]: fungible balances, item balances, allowances
//! - [`OffChainGateway`] / [`InMemoryGateway`]: hold, settle, reverse at a processor
//! - [`Rail`]: escrow / release / refund for one transfer, closed set of backends
//! - [`StatusBook`]: per-rail `TransferId → RailStatus` with conservation tallies
//! - [`RailRegistry`]: lookup from [`RailKey`](opensettle_types::RailKey) to rail
//!
//! ## Guarantees
//!
//! - A transfer id is prepared at most once per rail, ever
//! - Released and refunded transfers never move again
//! - Backend failures leave the status book untouched

pub mod gateway;
pub mod ledger;
pub mod rail;
pub mod registry;
pub mod status_book;

pub use gateway::{GatewayError, GatewayOp, HoldState, InMemoryGateway, OffChainGateway};
pub use ledger::{InMemoryLedger, Ledger, LedgerError};
pub use rail::{Rail, RailBackend, RailKind};
pub use registry::RailRegistry;
pub use status_book::{StatusBook, TransferTally};
