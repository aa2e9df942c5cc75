//! Racing callers against shared coordinator and engine instances.
//!
//! Every record is serialized by its own mutex, so whichever call takes the
//! lock first decides the outcome and the loser sees the committed state.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use opensettle_preflight::Preflight;
use opensettle_rails::{InMemoryLedger, Ledger, Rail};
use opensettle_settlement::{DirectEscrowEngine, SettlementCoordinator};
use opensettle_types::*;
use rust_decimal::Decimal;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn asset_x() -> AssetId {
    AssetId::fungible("X")
}

fn asset_y() -> AssetId {
    AssetId::fungible("Y")
}

struct Hub {
    hub: Arc<SettlementCoordinator>,
    ledger: Arc<InMemoryLedger>,
    custody_x: PartyId,
    custody_y: PartyId,
    now: DateTime<Utc>,
}

impl Hub {
    fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let custody_x = PartyId::random();
        let custody_y = PartyId::random();
        let hub = SettlementCoordinator::new(CoordinatorConfig::default(), Preflight::permissive());
        hub.register_rail(RailKey::new("x"), Rail::fungible(custody_x, ledger.clone()))
            .unwrap();
        hub.register_rail(RailKey::new("y"), Rail::fungible(custody_y, ledger.clone()))
            .unwrap();
        Self {
            hub: Arc::new(hub),
            ledger,
            custody_x,
            custody_y,
            now: Utc::now(),
        }
    }

    /// Fund two fresh parties and open a deal between them.
    fn deal(&self) -> (DealId, PartyId, PartyId) {
        let p1 = PartyId::random();
        let p2 = PartyId::random();
        self.ledger.mint(p1, &asset_x(), dec(1000));
        self.ledger.mint(p2, &asset_y(), dec(2000));
        self.ledger.approve(p1, self.custody_x, &asset_x(), dec(1000));
        self.ledger.approve(p2, self.custody_y, &asset_y(), dec(2000));

        let id = DealId::new();
        self.hub
            .open(
                p1,
                id,
                Leg::new(
                    RailKey::new("x"),
                    TransferDescriptor::new(asset_x(), p1, p2, dec(1000)),
                ),
                Leg::new(
                    RailKey::new("y"),
                    TransferDescriptor::new(asset_y(), p2, p1, dec(2000)),
                ),
                self.now + Duration::hours(1),
                self.now,
            )
            .unwrap();
        (id, p1, p2)
    }
}

#[test]
fn finalize_and_cancel_race_to_one_outcome() {
    for _ in 0..20 {
        let h = Hub::new();
        let (id, p1, p2) = h.deal();
        h.hub.prepare_leg(p1, id, LegSide::A, h.now).unwrap();
        h.hub.prepare_leg(p2, id, LegSide::B, h.now).unwrap();

        let now = h.now;
        let finalizer = {
            let hub = h.hub.clone();
            thread::spawn(move || hub.finalize(p2, id, now).is_ok())
        };
        let canceller = {
            let hub = h.hub.clone();
            thread::spawn(move || hub.cancel(p1, id, now).is_ok())
        };
        let finalized = finalizer.join().unwrap();
        let cancelled = canceller.join().unwrap();
        assert!(finalized ^ cancelled, "exactly one outcome must win");

        let deal = h.hub.deal(&id).unwrap();
        if finalized {
            assert_eq!(deal.state, DealState::Finalized);
            assert_eq!(h.ledger.balance(&p2, &asset_x()), dec(1000));
            assert_eq!(h.ledger.balance(&p1, &asset_y()), dec(2000));
        } else {
            assert_eq!(deal.state, DealState::Cancelled);
            assert_eq!(h.ledger.balance(&p1, &asset_x()), dec(1000));
            assert_eq!(h.ledger.balance(&p2, &asset_y()), dec(2000));
        }
        assert_eq!(h.ledger.balance(&h.custody_x, &asset_x()), Decimal::ZERO);
        assert_eq!(h.ledger.balance(&h.custody_y, &asset_y()), Decimal::ZERO);
    }
}

#[test]
fn concurrent_prepares_escrow_once() {
    let h = Hub::new();
    let (id, p1, _) = h.deal();

    let now = h.now;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let hub = h.hub.clone();
            thread::spawn(move || hub.prepare_leg(p1, id, LegSide::A, now))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, SettleError::InvalidState { .. }))
    );
    assert_eq!(h.ledger.balance(&p1, &asset_x()), Decimal::ZERO);
    assert_eq!(h.ledger.balance(&h.custody_x, &asset_x()), dec(1000));
}

#[test]
fn independent_deals_settle_in_parallel() {
    let h = Hub::new();
    let deals: Vec<_> = (0..16).map(|_| h.deal()).collect();

    let now = h.now;
    let handles: Vec<_> = deals
        .iter()
        .copied()
        .map(|(id, p1, p2)| {
            let hub = h.hub.clone();
            thread::spawn(move || {
                hub.prepare_leg(p1, id, LegSide::A, now)?;
                hub.prepare_leg(p2, id, LegSide::B, now)?;
                hub.finalize(p1, id, now)
            })
        })
        .collect();
    for t in handles {
        t.join().unwrap().unwrap();
    }

    assert_eq!(h.hub.deal_count(), 16);
    for (id, p1, p2) in deals {
        assert_eq!(h.hub.deal(&id).unwrap().state, DealState::Finalized);
        assert_eq!(h.ledger.balance(&p2, &asset_x()), dec(1000));
        assert_eq!(h.ledger.balance(&p1, &asset_y()), dec(2000));
    }
    assert_eq!(h.ledger.balance(&h.custody_x, &asset_x()), Decimal::ZERO);
    assert_eq!(h.ledger.balance(&h.custody_y, &asset_y()), Decimal::ZERO);
}

// ---------------------------------------------------------------------------
// Direct escrow engine
// ---------------------------------------------------------------------------

struct Engine {
    engine: Arc<DirectEscrowEngine>,
    ledger: Arc<InMemoryLedger>,
    custody: PartyId,
    party1: PartyKeys,
    party2: PartyKeys,
    now: DateTime<Utc>,
}

impl Engine {
    fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let custody = PartyId::random();
        let party1 = PartyKeys::from_seed(11);
        let party2 = PartyKeys::from_seed(12);
        ledger.mint(party1.id, &asset_x(), dec(2000));
        ledger.mint(party2.id, &asset_y(), dec(2000));
        ledger.approve(party1.id, custody, &asset_x(), dec(2000));

        let engine = DirectEscrowEngine::new(
            EngineConfig::new(PartyId::random()),
            PartyId::random(),
            custody,
            ledger.clone(),
            Preflight::permissive(),
        )
        .unwrap();
        Self {
            engine: Arc::new(engine),
            ledger,
            custody,
            party1,
            party2,
            now: Utc::now(),
        }
    }

    /// 1000 X from party1 for 1000 Y from party2.
    fn pvp(&self) -> InstructionId {
        let id = InstructionId::new();
        self.engine
            .create(
                self.party1.id,
                id,
                InstructionTerms::FungibleForFungible {
                    party_a: self.party1.id,
                    asset_a: asset_x(),
                    amount_a: dec(1000),
                    party_b: self.party2.id,
                    asset_b: asset_y(),
                    amount_b: dec(1000),
                },
                self.now + Duration::hours(1),
                self.now,
            )
            .unwrap();
        id
    }

    fn authorize(&self, id: InstructionId, nonce: u64) -> DelegatedAuthorization {
        let ins = self.engine.instruction(&id).unwrap();
        DelegatedAuthorization::sign(
            &self.party2.signing,
            ins.escrow_transfer(LegSide::B, self.custody),
            nonce,
            self.now + Duration::minutes(10),
        )
    }
}

#[test]
fn settle_and_cancel_race_to_one_outcome() {
    let e = Engine::new();
    let id = e.pvp();
    let auth = e.authorize(id, 1);
    e.engine
        .fund(e.party1.id, id, LegSide::A, dec(1000), e.now)
        .unwrap();
    e.engine
        .fund_with_authorization(id, LegSide::B, &auth, e.now)
        .unwrap();

    let (p1, p2, now) = (e.party1.id, e.party2.id, e.now);
    let settler = {
        let engine = e.engine.clone();
        thread::spawn(move || engine.settle(p1, id, now).is_ok())
    };
    let canceller = {
        let engine = e.engine.clone();
        thread::spawn(move || engine.cancel(p2, id, now).is_ok())
    };
    let settled = settler.join().unwrap();
    let cancelled = canceller.join().unwrap();
    assert!(settled ^ cancelled, "exactly one outcome must win");

    let state = e.engine.instruction(&id).unwrap().state;
    let expected = if settled {
        InstructionState::Settled
    } else {
        InstructionState::Cancelled
    };
    assert_eq!(state, expected);
    assert_eq!(e.ledger.balance(&e.custody, &asset_x()), Decimal::ZERO);
    assert_eq!(e.ledger.balance(&e.custody, &asset_y()), Decimal::ZERO);
    e.engine.verify_conservation().unwrap();
}

#[test]
fn shared_nonce_funds_only_one_instruction() {
    let e = Engine::new();
    let first = e.pvp();
    let second = e.pvp();
    let auths = [(first, e.authorize(first, 7)), (second, e.authorize(second, 7))];

    let now = e.now;
    let handles: Vec<_> = auths
        .into_iter()
        .map(|(id, auth)| {
            let engine = e.engine.clone();
            thread::spawn(move || engine.fund_with_authorization(id, LegSide::B, &auth, now))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(SettleError::NonceReused { .. })))
    );
    assert_eq!(e.ledger.balance(&e.party2.id, &asset_y()), dec(1000));
    e.engine.verify_conservation().unwrap();
}
