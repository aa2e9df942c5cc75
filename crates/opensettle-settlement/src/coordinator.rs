//! # Settlement coordinator: two-phase commit over two rails
//!
//! ## State Machine
//!
//! ```text
//!            prepare A  ┌────────────┐ prepare B
//!          ┌───────────▶│ PREPARED_A ├───────────┐
//!   ┌──────┤            └────────────┘           ▼
//!   │ OPEN │                              ┌───────────────┐ finalize ┌───────────┐
//!   └──────┤            ┌────────────┐    │ PREPARED_BOTH ├─────────▶│ FINALIZED │
//!          └───────────▶│ PREPARED_B ├───▶└───────────────┘          └───────────┘
//!            prepare B  └────────────┘ prepare A
//!
//!   any non-terminal state ──cancel──▶ CANCELLED (before deadline)
//!                                      EXPIRED   (after deadline)
//! ```
//!
//! ## Outcome protocol
//!
//! `finalize` and `cancel` first validate everything (state, deadline,
//! caller, both rails, both legs releasable or refundable) and only then
//! touch a rail. The chosen outcome is recorded on the deal as its
//! `decision` before the first rail call. If a rail call fails:
//!
//! - on the first leg: nothing moved, the decision is withdrawn and the
//!   rail's error is returned
//! - after a leg moved: [`SettleError::OutcomeIncomplete`]; the decision
//!   stays, the opposite outcome is refused, and repeating the same call
//!   completes only the outstanding leg

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opensettle_preflight::{Preflight, PreflightContext};
use opensettle_rails::{Rail, RailRegistry};
use opensettle_types::{
    CoordinatorConfig, Deal, DealId, DealState, Leg, LegSide, PartyId, RailKey, RailStatus,
    Result, SettleError, TransferId, check_deadline,
};
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::store::RecordStore;

/// What a terminal outcome does to one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegAction {
    Release,
    Refund,
    Void,
}

/// The two-phase settlement hub.
pub struct SettlementCoordinator {
    config: CoordinatorConfig,
    registry: RwLock<RailRegistry>,
    preflight: Preflight,
    deals: RecordStore<DealId, Deal>,
    /// Which deal owns each transfer on each rail. Never released.
    claims: Mutex<HashMap<(RailKey, TransferId), DealId>>,
}

impl SettlementCoordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig, preflight: Preflight) -> Self {
        Self {
            config,
            registry: RwLock::new(RailRegistry::new()),
            preflight,
            deals: RecordStore::new(),
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// The rail registry. Take the write lock to register or replace rails.
    #[must_use]
    pub fn registry(&self) -> &RwLock<RailRegistry> {
        &self.registry
    }

    /// Shorthand for registering a rail.
    ///
    /// # Errors
    /// [`SettleError::AlreadyExists`] if `key` is taken.
    pub fn register_rail(&self, key: RailKey, rail: Rail) -> Result<Arc<Rail>> {
        self.registry.write().register(key, rail)
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Open
    // -----------------------------------------------------------------

    /// Create an `OPEN` deal. `caller` becomes its operator.
    ///
    /// # Errors
    /// - [`SettleError::DeadlineExpired`] / [`SettleError::InvalidDeadline`]
    /// - [`SettleError::Configuration`] if the configured lifetime is out of range
    /// - [`SettleError::UnknownRail`] if a leg names an unregistered rail
    /// - [`SettleError::InvalidTransfer`] if a rail cannot carry its leg
    /// - [`SettleError::AlreadyExists`] if `id` is taken or a leg's transfer
    ///   already belongs to another deal on the same rail
    pub fn open(
        &self,
        caller: PartyId,
        id: DealId,
        leg_a: Leg,
        leg_b: Leg,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Deal> {
        check_deadline(
            &id.to_string(),
            now,
            deadline,
            self.config.max_deal_lifetime_secs,
        )?;

        for leg in [&leg_a, &leg_b] {
            self.resolve(&leg.rail)?.validate(&leg.transfer)?;
        }
        if leg_a.rail == leg_b.rail && leg_a.transfer_id() == leg_b.transfer_id() {
            return Err(SettleError::InvalidTransfer {
                reason: "both legs are the same transfer on the same rail".into(),
            });
        }

        let keys = [
            (leg_a.rail.clone(), leg_a.transfer_id()),
            (leg_b.rail.clone(), leg_b.transfer_id()),
        ];
        let mut claims = self.claims.lock();
        for key in &keys {
            if let Some(owner) = claims.get(key) {
                return Err(SettleError::AlreadyExists(format!(
                    "{} on {} is claimed by {owner}",
                    key.1, key.0
                )));
            }
        }

        let deal = Deal::new(id, caller, leg_a, leg_b, now, deadline);
        self.deals.insert(id, deal.clone())?;
        for key in keys {
            claims.insert(key, id);
        }
        drop(claims);

        info!(
            deal = %id,
            operator = %caller,
            rail_a = %deal.leg_a.rail,
            rail_b = %deal.leg_b.rail,
            deadline = %deadline,
            "Deal opened"
        );
        Ok(deal)
    }

    // -----------------------------------------------------------------
    // Prepare
    // -----------------------------------------------------------------

    /// Screen and escrow one leg.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] if the deal is terminal, deciding, or
    ///   the leg is already prepared
    /// - [`SettleError::DeadlineExpired`] past the deadline
    /// - [`SettleError::Unauthorized`] unless the caller is the operator or
    ///   the leg's payer
    /// - [`SettleError::Sanctioned`] / [`SettleError::ComplianceRejected`]
    /// - any rail error; the deal is unchanged
    pub fn prepare_leg(
        &self,
        caller: PartyId,
        id: DealId,
        side: LegSide,
        now: DateTime<Utc>,
    ) -> Result<DealState> {
        let record = self.deals.get(&id)?;
        let mut deal = record.lock();

        ensure_undecided(&deal)?;
        if deal.is_expired(now) {
            return Err(SettleError::DeadlineExpired(format!(
                "{id}: deadline {} passed",
                deal.deadline
            )));
        }
        if !deal.may_prepare(&caller, side) {
            warn!(deal = %id, side = %side, caller = %caller, "Unauthorized prepare");
            return Err(SettleError::Unauthorized {
                caller,
                reason: format!("may not prepare leg {side} of {id}"),
            });
        }
        let next = deal
            .state
            .after_prepare(side)
            .ok_or_else(|| SettleError::InvalidState {
                reason: format!("{id} is {}, leg {side} cannot be prepared", deal.state),
            })?;

        let leg = deal.leg(side).clone();
        let rail = self.resolve(&leg.rail)?;
        self.preflight
            .screen_transfer(&leg.transfer, &PreflightContext::new(id, side))?;
        let transfer_id = rail.prepare(&leg.transfer)?;

        deal.state = next;
        info!(
            deal = %id,
            side = %side,
            transfer = %transfer_id,
            amount = %leg.transfer.amount,
            state = %next,
            "Leg prepared"
        );
        Ok(next)
    }

    // -----------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------

    /// Release both legs. Only from `PREPARED_BOTH`, only while
    /// `now ≤ deadline`, unless resuming an interrupted finalize.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] from any other state
    /// - [`SettleError::DeadlineExpired`] past the deadline
    /// - [`SettleError::Unauthorized`] unless the caller is a participant
    /// - [`SettleError::OutcomeIncomplete`] if a release failed after the
    ///   other leg was released
    pub fn finalize(&self, caller: PartyId, id: DealId, now: DateTime<Utc>) -> Result<()> {
        let record = self.deals.get(&id)?;
        let mut deal = record.lock();

        if deal.state.is_terminal() {
            return Err(SettleError::InvalidState {
                reason: format!("{id} is already {}", deal.state),
            });
        }
        match deal.decision {
            Some(DealState::Finalized) => {}
            Some(other) => {
                return Err(SettleError::InvalidState {
                    reason: format!("{id} is being resolved as {other}"),
                });
            }
            None => {
                if deal.state != DealState::PreparedBoth {
                    return Err(SettleError::InvalidState {
                        reason: format!("{id} is {}, not PREPARED_BOTH", deal.state),
                    });
                }
                if deal.is_expired(now) {
                    return Err(SettleError::DeadlineExpired(format!(
                        "{id}: deadline {} passed",
                        deal.deadline
                    )));
                }
            }
        }
        if !deal.is_participant(&caller) {
            warn!(deal = %id, caller = %caller, "Unauthorized finalize");
            return Err(SettleError::Unauthorized {
                caller,
                reason: format!("not a participant of {id}"),
            });
        }

        let rails = self.resolve_legs(&deal)?;
        for side in LegSide::BOTH {
            if !deal.completed.get(side) {
                let leg = deal.leg(side);
                rails[slot(side)].ensure_releasable(&leg.transfer_id(), &leg.transfer)?;
            }
        }

        let plan = [(LegSide::A, LegAction::Release), (LegSide::B, LegAction::Release)];
        apply_outcome(&mut deal, DealState::Finalized, &plan, &rails)?;
        info!(deal = %id, caller = %caller, "Deal finalized");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------

    /// Refund prepared legs and void unprepared ones.
    ///
    /// Participants may cancel at any time; anyone may once the deadline
    /// has passed. The outcome is `CANCELLED` before the deadline and
    /// `EXPIRED` after it.
    ///
    /// # Errors
    /// - [`SettleError::InvalidState`] if terminal or being finalized
    /// - [`SettleError::DeadlineNotReached`] for a non-participant before
    ///   the deadline
    /// - [`SettleError::OutcomeIncomplete`] if a refund failed after the
    ///   other leg was already handled
    pub fn cancel(&self, caller: PartyId, id: DealId, now: DateTime<Utc>) -> Result<DealState> {
        let record = self.deals.get(&id)?;
        let mut deal = record.lock();

        if deal.state.is_terminal() {
            return Err(SettleError::InvalidState {
                reason: format!("{id} is already {}", deal.state),
            });
        }
        let outcome = match deal.decision {
            Some(DealState::Finalized) => {
                return Err(SettleError::InvalidState {
                    reason: format!("{id} is being finalized"),
                });
            }
            Some(decided) => decided,
            None if deal.is_expired(now) => DealState::Expired,
            None => DealState::Cancelled,
        };
        if !deal.is_participant(&caller) && !deal.is_expired(now) {
            warn!(deal = %id, caller = %caller, "Cancel before deadline by non-participant");
            return Err(SettleError::DeadlineNotReached(format!(
                "{id}: only participants may cancel before {}",
                deal.deadline
            )));
        }

        let rails = self.resolve_legs(&deal)?;
        let prepared = deal.prepared();
        let mut plan = Vec::with_capacity(2);
        for side in LegSide::BOTH {
            if prepared.get(side) {
                if !deal.completed.get(side) {
                    let leg = deal.leg(side);
                    rails[slot(side)].ensure_refundable(&leg.transfer_id(), &leg.transfer)?;
                }
                plan.push((side, LegAction::Refund));
            }
        }
        // Voids last: only refunds can fail for want of custody.
        for side in LegSide::BOTH {
            if !prepared.get(side) {
                plan.push((side, LegAction::Void));
            }
        }

        apply_outcome(&mut deal, outcome, &plan, &rails)?;
        info!(
            deal = %id,
            caller = %caller,
            refunded_a = prepared.a,
            refunded_b = prepared.b,
            state = %outcome,
            "Deal cancelled"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// # Errors
    /// [`SettleError::NotFound`] if no deal has this id.
    pub fn deal(&self, id: &DealId) -> Result<Deal> {
        self.deals.snapshot(id)
    }

    #[must_use]
    pub fn deal_count(&self) -> usize {
        self.deals.len()
    }

    fn resolve(&self, key: &RailKey) -> Result<Arc<Rail>> {
        self.registry.read().resolve(key)
    }

    fn resolve_legs(&self, deal: &Deal) -> Result<[Arc<Rail>; 2]> {
        let registry = self.registry.read();
        Ok([
            registry.resolve(&deal.leg_a.rail)?,
            registry.resolve(&deal.leg_b.rail)?,
        ])
    }
}

fn slot(side: LegSide) -> usize {
    match side {
        LegSide::A => 0,
        LegSide::B => 1,
    }
}

fn ensure_undecided(deal: &Deal) -> Result<()> {
    if deal.state.is_terminal() {
        return Err(SettleError::InvalidState {
            reason: format!("{} is already {}", deal.id, deal.state),
        });
    }
    if let Some(decided) = deal.decision {
        return Err(SettleError::InvalidState {
            reason: format!("{} is being resolved as {decided}", deal.id),
        });
    }
    Ok(())
}

/// Record `outcome` and run `plan`, skipping legs already completed.
fn apply_outcome(
    deal: &mut Deal,
    outcome: DealState,
    plan: &[(LegSide, LegAction)],
    rails: &[Arc<Rail>; 2],
) -> Result<()> {
    let fresh = deal.decision.is_none();
    deal.decision = Some(outcome);

    for &(side, action) in plan {
        if deal.completed.get(side) {
            continue;
        }
        let leg = deal.leg(side).clone();
        let rail = &rails[slot(side)];
        let transfer_id = leg.transfer_id();
        let res = match action {
            LegAction::Release => rail.release(&transfer_id, &leg.transfer),
            LegAction::Refund => rail.refund(&transfer_id, &leg.transfer),
            // A transfer the rail already knows about is left alone.
            LegAction::Void if rail.status(&transfer_id) == RailStatus::None => {
                rail.void(&transfer_id)
            }
            LegAction::Void => Ok(()),
        };

        if let Err(e) = res {
            if !deal.completed.any() {
                if fresh {
                    deal.decision = None;
                }
                return Err(e);
            }
            error!(
                deal = %deal.id,
                side = %side,
                outcome = %outcome,
                error = %e,
                "Outcome interrupted after one leg moved"
            );
            return Err(SettleError::OutcomeIncomplete {
                record: deal.id.to_string(),
                reason: format!("leg {side}: {e}"),
            });
        }
        deal.completed.set(side);
    }

    deal.state = outcome;
    Ok(())
}
