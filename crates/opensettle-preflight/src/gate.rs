//! Compliance gate: the synchronous allow/deny check run before funding.
//!
//! ## Design Principles
//!
//! - **Fail-closed**: anything the gate cannot judge is rejected
//! - **Before escrow only**: never re-queried once value is in custody
//! - **Pluggable**: hosts supply their own [`ComplianceGate`]

use std::collections::{HashMap, HashSet};

use opensettle_types::{AssetId, LegSide, PartyId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The outcome of one compliance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceDecision {
    pub allowed: bool,
    pub reason: String,
}

impl ComplianceDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// What the funding action belongs to, passed through to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightContext {
    /// Display form of the deal or instruction id.
    pub record: String,
    pub side: LegSide,
}

impl PreflightContext {
    #[must_use]
    pub fn new(record: impl ToString, side: LegSide) -> Self {
        Self {
            record: record.to_string(),
            side,
        }
    }
}

/// Host-provided compliance decision service.
pub trait ComplianceGate: Send + Sync {
    fn check(
        &self,
        payer: &PartyId,
        payee: &PartyId,
        asset: &AssetId,
        amount: Decimal,
        ctx: &PreflightContext,
    ) -> ComplianceDecision;
}

/// Gate that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ComplianceGate for AllowAll {
    fn check(
        &self,
        _payer: &PartyId,
        _payee: &PartyId,
        _asset: &AssetId,
        _amount: Decimal,
        _ctx: &PreflightContext,
    ) -> ComplianceDecision {
        ComplianceDecision::allow()
    }
}

/// Static rules keyed by asset symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateRules {
    /// Largest amount allowed per funding action, by symbol.
    #[serde(default)]
    pub max_amount: HashMap<String, Decimal>,
    /// Symbols that may not be escrowed at all.
    #[serde(default)]
    pub blocked_assets: HashSet<String>,
}

/// Rule-based reference gate.
#[derive(Debug, Clone, Default)]
pub struct RuleGate {
    rules: GateRules,
}

impl RuleGate {
    #[must_use]
    pub fn new(rules: GateRules) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn with_max_amount(mut self, symbol: impl Into<String>, max: Decimal) -> Self {
        self.rules.max_amount.insert(symbol.into(), max);
        self
    }

    #[must_use]
    pub fn with_blocked_asset(mut self, symbol: impl Into<String>) -> Self {
        self.rules.blocked_assets.insert(symbol.into());
        self
    }
}

impl ComplianceGate for RuleGate {
    fn check(
        &self,
        _payer: &PartyId,
        _payee: &PartyId,
        asset: &AssetId,
        amount: Decimal,
        _ctx: &PreflightContext,
    ) -> ComplianceDecision {
        // 1. Non-positive amounts cannot be judged
        if amount <= Decimal::ZERO {
            return ComplianceDecision::deny(format!("non-positive amount {amount}"));
        }

        // 2. Blocked assets
        if self.rules.blocked_assets.contains(&asset.symbol) {
            return ComplianceDecision::deny(format!("asset {} is blocked", asset.symbol));
        }

        // 3. Per-asset ceiling
        if let Some(max) = self.rules.max_amount.get(&asset.symbol) {
            if amount > *max {
                return ComplianceDecision::deny(format!(
                    "amount {amount} exceeds {} limit {max}",
                    asset.symbol
                ));
            }
        }

        ComplianceDecision::allow()
    }
}
