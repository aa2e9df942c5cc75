//! # Direct escrow engine: self-custody PvP and DvP
//!
//! The engine holds escrowed value itself, in a custody account on a
//! [`Ledger`], instead of delegating to rails. It supports three exchange
//! kinds (see [`InstructionKind`]) under one state machine:
//!
//! ```text
//! OPEN ──both sides funded──▶ FUNDED ──settle──▶ SETTLED
//!   │                           │
//!   └────────── cancel ─────────┴──▶ CANCELLED (before deadline)
//!                                    EXPIRED   (after deadline)
//! ```
//!
//! ## Funding paths
//!
//! | call                        | side            | source                         |
//! |-----------------------------|-----------------|--------------------------------|
//! | `fund`                      | any fungible    | allowance pull by custody      |
//! | `deposit_item`              | DvP item side   | allowance pull by custody      |
//! | `fund_with_authorization`   | any             | signed transfer, nonce-checked |
//!
//! Every path runs the preflight screen before value moves.
//!
//! ## Settlement and cancellation
//!
//! Both compute the full payout list, check custody covers it, commit the
//! new state, and only then move value. A ledger failure after commit is
//! reported as [`SettleError::PayoutFailed`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opensettle_preflight::{Preflight, PreflightContext};
use opensettle_rails::Ledger;
use opensettle_types::{
    AssetId, DelegatedAuthorization, EngineConfig, FeeConfig, Instruction, InstructionId,
    InstructionKind, InstructionState, InstructionTerms, LegSide, PartyId, Result, SettleError,
    check_deadline, lifetime,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::accounting::EscrowAccounting;
use crate::nonce::NonceRegistry;
use crate::store::RecordStore;

/// How escrowed value enters custody.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pull {
    /// Custody spends the party's allowance.
    Allowance,
    /// The party signed the transfer; it moves on the party's own authority.
    Signed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayoutKind {
    Net,
    Fee,
    Refund,
}

/// One movement out of custody.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payout {
    kind: PayoutKind,
    asset: AssetId,
    to: PartyId,
    amount: Decimal,
}

/// The self-custody escrow engine.
pub struct DirectEscrowEngine {
    operator: PartyId,
    custody: PartyId,
    ledger: Arc<dyn Ledger>,
    preflight: Preflight,
    max_lifetime_secs: i64,
    fee: RwLock<FeeConfig>,
    instructions: RecordStore<InstructionId, Instruction>,
    nonces: NonceRegistry,
    accounting: Mutex<EscrowAccounting>,
}

impl DirectEscrowEngine {
    /// Build an engine. `operator` is the only party allowed to change the
    /// fee; `custody` is the ledger account escrowed value sits in.
    ///
    /// # Errors
    /// [`SettleError::FeeConfigInvalid`] or [`SettleError::Configuration`]
    /// for an invalid `config`.
    pub fn new(
        config: EngineConfig,
        operator: PartyId,
        custody: PartyId,
        ledger: Arc<dyn Ledger>,
        preflight: Preflight,
    ) -> Result<Self> {
        config.fee.validate()?;
        ensure_fee_recipient(&config.fee, custody)?;
        lifetime(
            "max_instruction_lifetime_secs",
            config.max_instruction_lifetime_secs,
        )?;
        Ok(Self {
            operator,
            custody,
            ledger,
            preflight,
            max_lifetime_secs: config.max_instruction_lifetime_secs,
            fee: RwLock::new(config.fee),
            instructions: RecordStore::new(),
            nonces: NonceRegistry::new(),
            accounting: Mutex::new(EscrowAccounting::new()),
        })
    }

    #[must_use]
    pub fn custody(&self) -> PartyId {
        self.custody
    }

    #[must_use]
    pub fn operator(&self) -> PartyId {
        self.operator
    }

    // -----------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------

    /// Create an `OPEN` instruction. `caller` becomes its operator.
    ///
    /// # Errors
    /// - [`SettleError::InvalidTerms`] for malformed terms
    /// - [`SettleError::DeadlineExpired`] / [`SettleError::InvalidDeadline`]
    /// - [`SettleError::AlreadyExists`] if `id` is taken
    pub fn create(
        &self,
        caller: PartyId,
        id: InstructionId,
        terms: InstructionTerms,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Instruction> {
        terms.validate()?;
        if LegSide::BOTH
            .iter()
            .any(|side| terms.party(*side) == self.custody)
        {
            return Err(SettleError::InvalidTerms {
                reason: "engine custody cannot be a party".into(),
            });
        }
        check_deadline(&id.to_string(), now, deadline, self.max_lifetime_secs)?;

        let instruction = Instruction::new(id, terms, caller, now, deadline);
        self.instructions.insert(id, instruction.clone())?;
        info!(
            instruction = %id,
            kind = %instruction.kind(),
            operator = %caller,
            deadline = %deadline,
            "Instruction created"
        );
        Ok(instruction)
    }

    // -----------------------------------------------------------------
    // Funding
    // -----------------------------------------------------------------

    /// Fund a fungible side with exactly the agreed amount.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] if not `OPEN`, the side is already
    ///   funded, or the side is a DvP item side
    /// - [`SettleError::DeadlineExpired`] past the deadline
    /// - [`SettleError::Unauthorized`] unless the caller owes this side
    /// - [`SettleError::AmountMismatch`] if `amount` differs from the terms
    /// - preflight and ledger errors; nothing moves
    pub fn fund(
        &self,
        caller: PartyId,
        id: InstructionId,
        side: LegSide,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<InstructionState> {
        let record = self.instructions.get(&id)?;
        let mut ins = record.lock();

        ensure_fundable(&ins, side, now)?;
        if ins.terms.is_item_side(side) {
            return Err(SettleError::InvalidState {
                reason: format!("side {side} of {id} is an item; use deposit_item"),
            });
        }
        ensure_side_party(&ins, caller, side)?;
        let expected = ins.terms.amount(side);
        if amount != expected {
            return Err(SettleError::AmountMismatch {
                expected,
                actual: amount,
            });
        }
        self.escrow_side(&mut ins, side, Pull::Allowance)
    }

    /// Deposit the item side of a DvP instruction.
    ///
    /// # Errors
    /// As [`Self::fund`]; [`SettleError::InvalidState`] for a PvP instruction.
    pub fn deposit_item(
        &self,
        caller: PartyId,
        id: InstructionId,
        now: DateTime<Utc>,
    ) -> Result<InstructionState> {
        let record = self.instructions.get(&id)?;
        let mut ins = record.lock();

        if ins.kind() == InstructionKind::FungibleForFungible {
            return Err(SettleError::InvalidState {
                reason: format!("{id} is PVP and has no item side"),
            });
        }
        ensure_fundable(&ins, LegSide::A, now)?;
        ensure_side_party(&ins, caller, LegSide::A)?;
        self.escrow_side(&mut ins, LegSide::A, Pull::Allowance)
    }

    /// Fund a side from a signed authorization instead of an allowance.
    /// Anyone may submit the authorization.
    ///
    /// # Errors
    /// - [`SettleError::AuthorizationExpired`] / [`SettleError::InvalidSignature`]
    /// - [`SettleError::Unauthorized`] if the signer does not owe this side,
    ///   or the signed transfer targets another instruction or custody
    /// - [`SettleError::AmountMismatch`] if the signed amount differs
    /// - [`SettleError::NonceReused`] on replay
    /// - state, deadline, preflight and ledger errors as [`Self::fund`]
    pub fn fund_with_authorization(
        &self,
        id: InstructionId,
        side: LegSide,
        auth: &DelegatedAuthorization,
        now: DateTime<Utc>,
    ) -> Result<InstructionState> {
        let record = self.instructions.get(&id)?;
        let mut ins = record.lock();

        ensure_fundable(&ins, side, now)?;
        auth.verify(now)?;

        let party = ins.terms.party(side);
        if auth.payer != party {
            warn!(instruction = %id, side = %side, signer = %auth.payer, "Authorization from wrong party");
            return Err(SettleError::Unauthorized {
                caller: auth.payer,
                reason: format!("does not owe side {side} of {id}"),
            });
        }
        let expected = ins.escrow_transfer(side, self.custody);
        if auth.transfer.amount != expected.amount {
            return Err(SettleError::AmountMismatch {
                expected: expected.amount,
                actual: auth.transfer.amount,
            });
        }
        if auth.transfer != expected {
            warn!(instruction = %id, side = %side, signer = %auth.payer, "Authorization for another transfer");
            return Err(SettleError::Unauthorized {
                caller: auth.payer,
                reason: format!("signed transfer is not the escrow of side {side} of {id}"),
            });
        }

        let slot = self.nonces.slot(auth.payer);
        let mut nonces = slot.lock();
        nonces.ensure_unused(auth.nonce)?;
        let state = self.escrow_side(&mut ins, side, Pull::Signed)?;
        nonces.consume(auth.nonce)?;
        Ok(state)
    }

    fn escrow_side(&self, ins: &mut Instruction, side: LegSide, pull: Pull) -> Result<InstructionState> {
        let party = ins.terms.party(side);
        let beneficiary = ins.terms.party(side.other());
        let asset = ins.terms.asset(side).clone();
        let amount = ins.terms.amount(side);

        self.preflight.screen(
            &party,
            &beneficiary,
            &asset,
            amount,
            &PreflightContext::new(ins.id, side),
        )?;

        let pulled = match pull {
            Pull::Allowance => {
                self.ledger
                    .transfer_from(&self.custody, &asset, &party, &self.custody, amount)
            }
            Pull::Signed => self.ledger.transfer(&asset, &party, &self.custody, amount),
        };
        pulled.map_err(|e| SettleError::TransferFailed {
            reason: e.to_string(),
        })?;

        ins.funded.set(side);
        self.accounting.lock().record_escrow(&asset, amount);
        if ins.funded.both() {
            ins.state = InstructionState::Funded;
        }
        info!(
            instruction = %ins.id,
            side = %side,
            party = %party,
            asset = %asset,
            amount = %amount,
            state = %ins.state,
            "Side funded"
        );
        Ok(ins.state)
    }

    // -----------------------------------------------------------------
    // Settle
    // -----------------------------------------------------------------

    /// Exchange both sides, net of fee on fungible payouts.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] unless `FUNDED`
    /// - [`SettleError::DeadlineExpired`] past the deadline
    /// - [`SettleError::Unauthorized`] unless a party or the operator
    /// - [`SettleError::TransferFailed`] if custody cannot cover the payouts
    /// - [`SettleError::PayoutFailed`] if a payout failed after commit
    pub fn settle(&self, caller: PartyId, id: InstructionId, now: DateTime<Utc>) -> Result<()> {
        let record = self.instructions.get(&id)?;
        let mut ins = record.lock();

        if ins.state != InstructionState::Funded {
            return Err(SettleError::InvalidState {
                reason: format!("{id} is {}, not FUNDED", ins.state),
            });
        }
        if ins.is_expired(now) {
            return Err(SettleError::DeadlineExpired(format!(
                "{id}: deadline {} passed",
                ins.deadline
            )));
        }
        if !ins.is_participant(&caller) {
            warn!(instruction = %id, caller = %caller, "Unauthorized settle");
            return Err(SettleError::Unauthorized {
                caller,
                reason: format!("not a participant of {id}"),
            });
        }

        let fee = *self.fee.read();
        let payouts = settlement_payouts(&ins, &fee);
        self.ensure_covered(&payouts)?;

        ins.state = InstructionState::Settled;
        self.pay_out(&ins, &payouts)?;
        info!(
            instruction = %id,
            kind = %ins.kind(),
            fee_bps = fee.basis_points,
            caller = %caller,
            "Instruction settled"
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------

    /// Refund whatever each side escrowed.
    ///
    /// Participants may cancel at any time; anyone may once the deadline
    /// has passed. The outcome is `CANCELLED` before the deadline and
    /// `EXPIRED` after it.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] if already terminal
    /// - [`SettleError::DeadlineNotReached`] for a non-participant before
    ///   the deadline
    /// - [`SettleError::PayoutFailed`] if a refund failed after commit
    pub fn cancel(
        &self,
        caller: PartyId,
        id: InstructionId,
        now: DateTime<Utc>,
    ) -> Result<InstructionState> {
        let record = self.instructions.get(&id)?;
        let mut ins = record.lock();

        if ins.state.is_terminal() {
            return Err(SettleError::InvalidState {
                reason: format!("{id} is already {}", ins.state),
            });
        }
        let expired = ins.is_expired(now);
        if !ins.is_participant(&caller) && !expired {
            warn!(instruction = %id, caller = %caller, "Cancel before deadline by non-participant");
            return Err(SettleError::DeadlineNotReached(format!(
                "{id}: only participants may cancel before {}",
                ins.deadline
            )));
        }
        let outcome = if expired {
            InstructionState::Expired
        } else {
            InstructionState::Cancelled
        };

        let refunds: Vec<Payout> = LegSide::BOTH
            .into_iter()
            .filter(|side| ins.funded.get(*side))
            .map(|side| Payout {
                kind: PayoutKind::Refund,
                asset: ins.terms.asset(side).clone(),
                to: ins.terms.party(side),
                amount: ins.terms.amount(side),
            })
            .collect();
        self.ensure_covered(&refunds)?;

        ins.state = outcome;
        self.pay_out(&ins, &refunds)?;
        info!(
            instruction = %id,
            caller = %caller,
            refunded_a = ins.funded.a,
            refunded_b = ins.funded.b,
            state = %outcome,
            "Instruction cancelled"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------
    // Payout helpers
    // -----------------------------------------------------------------

    fn ensure_covered(&self, payouts: &[Payout]) -> Result<()> {
        let mut needed: HashMap<&AssetId, Decimal> = HashMap::new();
        for p in payouts {
            *needed.entry(&p.asset).or_insert(Decimal::ZERO) += p.amount;
        }
        for (asset, amount) in needed {
            let held = self.ledger.balance(&self.custody, asset);
            if held < amount {
                return Err(SettleError::TransferFailed {
                    reason: format!("custody holds {held} {asset}, payouts need {amount}"),
                });
            }
        }
        Ok(())
    }

    fn pay_out(&self, ins: &Instruction, payouts: &[Payout]) -> Result<()> {
        let mut failures = Vec::new();
        for p in payouts {
            match self
                .ledger
                .transfer(&p.asset, &self.custody, &p.to, p.amount)
            {
                Ok(()) => {
                    let mut acc = self.accounting.lock();
                    match p.kind {
                        PayoutKind::Net => acc.record_payout(&p.asset, p.amount),
                        PayoutKind::Fee => acc.record_fee(&p.asset, p.amount),
                        PayoutKind::Refund => acc.record_refund(&p.asset, p.amount),
                    }
                }
                Err(e) => {
                    error!(
                        instruction = %ins.id,
                        asset = %p.asset,
                        to = %p.to,
                        amount = %p.amount,
                        error = %e,
                        "Payout failed after commit"
                    );
                    failures.push(format!("{} {} to {}: {e}", p.amount, p.asset, p.to));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SettleError::PayoutFailed {
                record: ins.id.to_string(),
                reason: failures.join("; "),
            })
        }
    }

    // -----------------------------------------------------------------
    // Fee administration
    // -----------------------------------------------------------------

    /// Replace the fee configuration. Operator only.
    ///
    /// # Errors
    /// - [`SettleError::Unauthorized`] for anyone but the operator
    /// - [`SettleError::FeeConfigInvalid`] above the cap
    /// - [`SettleError::Configuration`] if `recipient` is the engine custody
    pub fn set_fee(&self, caller: PartyId, basis_points: u32, recipient: PartyId) -> Result<()> {
        if caller != self.operator {
            warn!(caller = %caller, "Unauthorized fee change");
            return Err(SettleError::Unauthorized {
                caller,
                reason: "only the engine operator may change the fee".into(),
            });
        }
        let cfg = FeeConfig::new(basis_points, recipient)?;
        ensure_fee_recipient(&cfg, self.custody)?;
        *self.fee.write() = cfg;
        info!(fee_bps = basis_points, recipient = %recipient, "Fee configuration changed");
        Ok(())
    }

    #[must_use]
    pub fn fee_config(&self) -> FeeConfig {
        *self.fee.read()
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// # Errors
    /// [`SettleError::NotFound`] if no instruction has this id.
    pub fn instruction(&self, id: &InstructionId) -> Result<Instruction> {
        self.instructions.snapshot(id)
    }

    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Snapshot of custody flows.
    #[must_use]
    pub fn accounting(&self) -> EscrowAccounting {
        self.accounting.lock().clone()
    }

    /// Check every tracked asset against the custody balance.
    ///
    /// # Errors
    /// [`SettleError::Internal`] naming the first asset out of balance.
    pub fn verify_conservation(&self) -> Result<()> {
        let acc = self.accounting.lock();
        for asset in acc.tracked_assets() {
            acc.verify(&asset, self.ledger.balance(&self.custody, &asset))?;
        }
        Ok(())
    }
}

/// Fees paid into custody would never leave it.
fn ensure_fee_recipient(fee: &FeeConfig, custody: PartyId) -> Result<()> {
    if fee.recipient == custody {
        return Err(SettleError::Configuration(
            "fee recipient cannot be the engine custody".into(),
        ));
    }
    Ok(())
}

fn ensure_fundable(ins: &Instruction, side: LegSide, now: DateTime<Utc>) -> Result<()> {
    if ins.state != InstructionState::Open {
        return Err(SettleError::InvalidState {
            reason: format!("{} is {}, not OPEN", ins.id, ins.state),
        });
    }
    if ins.is_expired(now) {
        return Err(SettleError::DeadlineExpired(format!(
            "{}: deadline {} passed",
            ins.id, ins.deadline
        )));
    }
    if ins.funded.get(side) {
        return Err(SettleError::InvalidState {
            reason: format!("side {side} of {} is already funded", ins.id),
        });
    }
    Ok(())
}

fn ensure_side_party(ins: &Instruction, caller: PartyId, side: LegSide) -> Result<()> {
    if caller != ins.terms.party(side) {
        warn!(instruction = %ins.id, side = %side, caller = %caller, "Unauthorized funding");
        return Err(SettleError::Unauthorized {
            caller,
            reason: format!("does not owe side {side} of {}", ins.id),
        });
    }
    Ok(())
}

/// Each party receives the other side; fungible payouts are split with the fee.
fn settlement_payouts(ins: &Instruction, fee: &FeeConfig) -> Vec<Payout> {
    let mut out = Vec::with_capacity(4);
    for side in LegSide::BOTH {
        let asset = ins.terms.asset(side).clone();
        let gross = ins.terms.amount(side);
        let to = ins.terms.party(side.other());

        let (net, cut) = if ins.terms.is_item_side(side) {
            (gross, Decimal::ZERO)
        } else {
            let split = fee.split(gross);
            (split.net, split.fee)
        };
        if net > Decimal::ZERO {
            out.push(Payout {
                kind: PayoutKind::Net,
                asset: asset.clone(),
                to,
                amount: net,
            });
        }
        if cut > Decimal::ZERO {
            out.push(Payout {
                kind: PayoutKind::Fee,
                asset,
                to: fee.recipient,
                amount: cut,
            });
        }
    }
    out
}
