//! # Rail: escrow, release, refund for a single transfer
//!
//! A rail is the leaf of the settlement stack. It knows how to take a
//! payer's value into custody (`prepare`), hand it to the payee
//! (`release`) or give it back (`refund`), and it remembers the status of
//! every transfer it has seen in a [`StatusBook`].
//!
//! ## Variants
//!
//! The set of backends is closed:
//!
//! | kind          | custody mechanism                                     |
//! |---------------|-------------------------------------------------------|
//! | `Fungible`    | allowance pull into the rail's custody party          |
//! | `NonFungible` | allowance pull of a single item into custody          |
//! | `External`    | hold / settle / reverse at an off-chain gateway       |
//!
//! ## Locking
//!
//! Every mutating call holds the rail's book lock across the backend call,
//! so two operations on the same rail never interleave. Callers that also
//! hold a record lock must take it first.

use std::sync::Arc;

use opensettle_types::{PartyId, RailStatus, Result, SettleError, TransferDescriptor, TransferId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::gateway::OffChainGateway;
use crate::ledger::Ledger;
use crate::status_book::{StatusBook, TransferTally};

/// Which backend a rail drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RailKind {
    Fungible,
    NonFungible,
    External,
}

impl std::fmt::Display for RailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fungible => write!(f, "FUNGIBLE"),
            Self::NonFungible => write!(f, "NON_FUNGIBLE"),
            Self::External => write!(f, "EXTERNAL"),
        }
    }
}

/// The collaborator a rail moves value through.
pub enum RailBackend {
    Fungible { ledger: Arc<dyn Ledger> },
    NonFungible { ledger: Arc<dyn Ledger> },
    External { gateway: Arc<dyn OffChainGateway> },
}

impl RailBackend {
    fn kind(&self) -> RailKind {
        match self {
            Self::Fungible { .. } => RailKind::Fungible,
            Self::NonFungible { .. } => RailKind::NonFungible,
            Self::External { .. } => RailKind::External,
        }
    }

    fn ledger(&self) -> Option<&Arc<dyn Ledger>> {
        match self {
            Self::Fungible { ledger } | Self::NonFungible { ledger } => Some(ledger),
            Self::External { .. } => None,
        }
    }
}

/// Direction of a payout out of custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payout {
    Release,
    Refund,
}

/// A settlement rail.
pub struct Rail {
    custody: PartyId,
    backend: RailBackend,
    book: Mutex<StatusBook>,
}

impl std::fmt::Debug for Rail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rail")
            .field("kind", &self.kind())
            .field("custody", &self.custody)
            .field("transfers", &self.book.lock().len())
            .finish_non_exhaustive()
    }
}

impl Rail {
    #[must_use]
    pub fn new(custody: PartyId, backend: RailBackend) -> Self {
        Self {
            custody,
            backend,
            book: Mutex::new(StatusBook::new()),
        }
    }

    /// Fungible-asset rail pulling into `custody` on `ledger`.
    #[must_use]
    pub fn fungible(custody: PartyId, ledger: Arc<dyn Ledger>) -> Self {
        Self::new(custody, RailBackend::Fungible { ledger })
    }

    /// Unique-item rail pulling into `custody` on `ledger`.
    #[must_use]
    pub fn non_fungible(custody: PartyId, ledger: Arc<dyn Ledger>) -> Self {
        Self::new(custody, RailBackend::NonFungible { ledger })
    }

    /// Off-chain rail; `custody` names the gateway's settlement account.
    #[must_use]
    pub fn external(custody: PartyId, gateway: Arc<dyn OffChainGateway>) -> Self {
        Self::new(custody, RailBackend::External { gateway })
    }

    #[must_use]
    pub fn kind(&self) -> RailKind {
        self.backend.kind()
    }

    #[must_use]
    pub fn custody(&self) -> PartyId {
        self.custody
    }

    /// Pure: the content-addressed id of `transfer`.
    #[must_use]
    pub fn derive_id(&self, transfer: &TransferDescriptor) -> TransferId {
        transfer.derive_id()
    }

    /// Check that `transfer` has a shape this rail can carry.
    ///
    /// # Errors
    /// [`SettleError::InvalidTransfer`] describing the first problem.
    pub fn validate(&self, transfer: &TransferDescriptor) -> Result<()> {
        let invalid = |reason: String| Err(SettleError::InvalidTransfer { reason });

        if transfer.amount <= Decimal::ZERO {
            return invalid(format!("amount must be positive, got {}", transfer.amount));
        }
        if transfer.payer == transfer.payee {
            return invalid(format!("payer and payee are both {}", transfer.payer));
        }
        if transfer.payer == self.custody || transfer.payee == self.custody {
            return invalid("rail custody cannot be a transfer party".into());
        }
        match self.kind() {
            RailKind::Fungible | RailKind::External => {
                if !transfer.asset_id.is_fungible() {
                    return invalid(format!(
                        "{} rail cannot carry item {}",
                        self.kind(),
                        transfer.asset_id
                    ));
                }
            }
            RailKind::NonFungible => {
                if transfer.asset_id.is_fungible() {
                    return invalid(format!(
                        "{} is not an item; NON_FUNGIBLE rail requires one",
                        transfer.asset_id
                    ));
                }
                if transfer.amount != Decimal::ONE {
                    return invalid(format!(
                        "unique item amount must be 1, got {}",
                        transfer.amount
                    ));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Two-phase operations
    // -----------------------------------------------------------------

    /// Escrow the payer's value into custody.
    ///
    /// # Errors
    /// - [`SettleError::AlreadyExists`] if the transfer id was seen before
    /// - [`SettleError::InvalidTransfer`] if the rail cannot carry it
    /// - [`SettleError::TransferFailed`] if the backend refuses the pull
    pub fn prepare(&self, transfer: &TransferDescriptor) -> Result<TransferId> {
        let id = transfer.derive_id();
        let mut book = self.book.lock();
        book.ensure_unseen(&id)?;
        self.validate(transfer)?;

        match &self.backend {
            RailBackend::Fungible { ledger } | RailBackend::NonFungible { ledger } => ledger
                .transfer_from(
                    &self.custody,
                    &transfer.asset_id,
                    &transfer.payer,
                    &self.custody,
                    transfer.amount,
                )
                .map_err(|e| SettleError::TransferFailed {
                    reason: e.to_string(),
                })?,
            RailBackend::External { gateway } => {
                gateway
                    .hold(&id, transfer)
                    .map_err(|e| SettleError::TransferFailed {
                        reason: e.to_string(),
                    })?;
            }
        }

        book.transition(id, RailStatus::Prepared, transfer.amount)?;
        debug!(
            rail = %self.kind(),
            transfer = %id,
            asset = %transfer.asset_id,
            amount = %transfer.amount,
            "Transfer prepared"
        );
        Ok(id)
    }

    /// Pay escrowed value to the payee. Only from `PREPARED`.
    ///
    /// # Errors
    /// - [`SettleError::InvalidTransfer`] if `id` does not match `transfer`
    /// - [`SettleError::InvalidState`] unless the transfer is `PREPARED`
    /// - [`SettleError::TransferFailed`] if the backend refuses
    pub fn release(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<()> {
        self.pay_out(id, transfer, Payout::Release)
    }

    /// Return escrowed value to the payer. Only from `PREPARED`.
    ///
    /// # Errors
    /// As [`Self::release`].
    pub fn refund(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<()> {
        self.pay_out(id, transfer, Payout::Refund)
    }

    /// Tombstone a transfer that was never prepared, blocking any later
    /// prepare of the same id.
    ///
    /// # Errors
    /// [`SettleError::InvalidState`] unless the transfer is `NONE`.
    pub fn void(&self, id: &TransferId) -> Result<()> {
        self.book
            .lock()
            .transition(*id, RailStatus::Cancelled, Decimal::ZERO)?;
        debug!(rail = %self.kind(), transfer = %id, "Transfer voided");
        Ok(())
    }

    fn pay_out(&self, id: &TransferId, transfer: &TransferDescriptor, dir: Payout) -> Result<()> {
        let mut book = self.book.lock();
        self.check_payout(&book, id, transfer)?;

        let (to, target) = match dir {
            Payout::Release => (transfer.payee, RailStatus::Released),
            Payout::Refund => (transfer.payer, RailStatus::Refunded),
        };
        let moved = match &self.backend {
            RailBackend::Fungible { ledger } | RailBackend::NonFungible { ledger } => ledger
                .transfer(&transfer.asset_id, &self.custody, &to, transfer.amount)
                .map_err(|e| e.to_string()),
            RailBackend::External { gateway } => {
                let res = match dir {
                    Payout::Release => gateway.settle(id, transfer),
                    Payout::Refund => gateway.reverse(id, transfer),
                };
                res.map_err(|e| e.to_string())
            }
        };
        moved.map_err(|reason| SettleError::TransferFailed { reason })?;

        book.transition(*id, target, transfer.amount)?;
        debug!(
            rail = %self.kind(),
            transfer = %id,
            to = %to,
            amount = %transfer.amount,
            status = %target,
            "Escrow paid out"
        );
        Ok(())
    }

    fn check_payout(
        &self,
        book: &StatusBook,
        id: &TransferId,
        transfer: &TransferDescriptor,
    ) -> Result<()> {
        if *id != transfer.derive_id() {
            return Err(SettleError::InvalidTransfer {
                reason: format!("{id} does not match the supplied transfer"),
            });
        }
        book.ensure_prepared(id)
    }

    // -----------------------------------------------------------------
    // Pure checks and queries
    // -----------------------------------------------------------------

    /// Would [`Self::release`] succeed right now? Checks id binding, status,
    /// and, for ledger-backed rails, that custody still covers the amount.
    ///
    /// # Errors
    /// As [`Self::release`], without side effects.
    pub fn ensure_releasable(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<()> {
        let book = self.book.lock();
        self.check_payout(&book, id, transfer)?;
        self.ensure_custody_covers(transfer)
    }

    /// Would [`Self::refund`] succeed right now?
    ///
    /// # Errors
    /// As [`Self::refund`], without side effects.
    pub fn ensure_refundable(&self, id: &TransferId, transfer: &TransferDescriptor) -> Result<()> {
        self.ensure_releasable(id, transfer)
    }

    fn ensure_custody_covers(&self, transfer: &TransferDescriptor) -> Result<()> {
        if let Some(ledger) = self.backend.ledger() {
            let held = ledger.balance(&self.custody, &transfer.asset_id);
            if held < transfer.amount {
                return Err(SettleError::TransferFailed {
                    reason: format!(
                        "custody holds {held} {}, payout needs {}",
                        transfer.asset_id, transfer.amount
                    ),
                });
            }
        }
        Ok(())
    }

    /// Pure lookup; unseen ids are `NONE`.
    #[must_use]
    pub fn status(&self, id: &TransferId) -> RailStatus {
        self.book.lock().status(id)
    }

    /// Cumulative amounts moved for `id`.
    #[must_use]
    pub fn tally(&self, id: &TransferId) -> TransferTally {
        self.book.lock().tally(id)
    }

    /// Does every transfer this rail has seen satisfy conservation?
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.book.lock().all_conserved()
    }
}
