//! System-wide constants for OpenSettle.

/// Upper bound for the settlement fee, in basis points (20%).
pub const FEE_BPS_CAP: u32 = 2000;

/// Basis points per whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Default maximum lifetime of a two-phase deal (7 days).
pub const DEFAULT_MAX_DEAL_LIFETIME_SECS: i64 = 7 * 24 * 3600;

/// Default maximum lifetime of a direct escrow instruction (7 days).
pub const DEFAULT_MAX_INSTRUCTION_LIFETIME_SECS: i64 = 7 * 24 * 3600;

/// Domain tag for content-addressed transfer identifiers.
pub const TRANSFER_ID_DOMAIN: &[u8] = b"opensettle:transfer_id:v1:";

/// Domain tag for delegated authorization signing payloads.
pub const AUTHORIZATION_DOMAIN: &[u8] = b"opensettle:auth:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "OpenSettle";
