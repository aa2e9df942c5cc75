//! # opensettle-preflight
//!
//! Compliance and sanctions screening run before any leg is funded.
//!
//! - [`ComplianceGate`]: host-provided allow/deny decision ([`AllowAll`], [`RuleGate`])
//! - [`SanctionsOracle`]: host-provided party lookup ([`SanctionsList`])
//! - [`Preflight`]: the screen every funding path calls; sanctions first, then the gate

pub mod gate;
pub mod sanctions;
pub mod screen;

pub use gate::{AllowAll, ComplianceDecision, ComplianceGate, GateRules, PreflightContext, RuleGate};
pub use sanctions::{SanctionsList, SanctionsOracle};
pub use screen::Preflight;
