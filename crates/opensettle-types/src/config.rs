//! Configuration types for the settlement coordinator and escrow engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{FeeConfig, PartyId, Result, SettleError, constants};

/// Two-phase coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Longest allowed distance between `open` and the deal deadline.
    pub max_deal_lifetime_secs: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_deal_lifetime_secs: constants::DEFAULT_MAX_DEAL_LIFETIME_SECS,
        }
    }
}

/// Direct escrow engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Initial fee configuration; later changed only through the operator.
    pub fee: FeeConfig,
    /// Longest allowed distance between `create` and the instruction deadline.
    pub max_instruction_lifetime_secs: i64,
}

impl EngineConfig {
    /// Zero-fee engine configuration with `fee_recipient` as collector.
    #[must_use]
    pub fn new(fee_recipient: PartyId) -> Self {
        Self {
            fee: FeeConfig::zero(fee_recipient),
            max_instruction_lifetime_secs: constants::DEFAULT_MAX_INSTRUCTION_LIFETIME_SECS,
        }
    }
}

/// Top-level settlement configuration, typically loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    pub engine: EngineConfig,
}

impl SettlementConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    /// [`SettleError::Serialization`] on malformed JSON,
    /// [`SettleError::Configuration`] on invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        lifetime(
            "coordinator.max_deal_lifetime_secs",
            self.coordinator.max_deal_lifetime_secs,
        )?;
        lifetime(
            "engine.max_instruction_lifetime_secs",
            self.engine.max_instruction_lifetime_secs,
        )?;
        self.engine
            .fee
            .validate()
            .map_err(|e| SettleError::Configuration(e.to_string()))
    }
}

/// A configured lifetime as a [`Duration`]: positive and representable.
///
/// # Errors
/// [`SettleError::Configuration`] otherwise.
pub fn lifetime(field: &str, secs: i64) -> Result<Duration> {
    if secs <= 0 {
        return Err(SettleError::Configuration(format!(
            "{field} must be positive"
        )));
    }
    Duration::try_seconds(secs).ok_or_else(|| {
        SettleError::Configuration(format!("{field} of {secs}s is out of range"))
    })
}

/// Check that `deadline` lies in `(now, now + max_lifetime_secs]`.
///
/// # Errors
/// [`SettleError::DeadlineExpired`] if the deadline is not in the future,
/// [`SettleError::InvalidDeadline`] if it is too far out,
/// [`SettleError::Configuration`] if `max_lifetime_secs` is not a valid lifetime.
pub fn check_deadline(
    record: &str,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    max_lifetime_secs: i64,
) -> Result<()> {
    if deadline <= now {
        return Err(SettleError::DeadlineExpired(format!(
            "{record}: deadline {deadline} is not after {now}"
        )));
    }
    if deadline - now > lifetime("max_lifetime_secs", max_lifetime_secs)? {
        return Err(SettleError::InvalidDeadline {
            reason: format!("{record}: deadline exceeds {max_lifetime_secs}s lifetime"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "coordinator": { "max_deal_lifetime_secs": 86400 },
        "engine": {
            "fee": { "basis_points": 250, "recipient": [
                7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7
            ] },
            "max_instruction_lifetime_secs": 3600
        }
    }"#;

    #[test]
    fn loads_from_json() {
        let cfg = SettlementConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.coordinator.max_deal_lifetime_secs, 86_400);
        assert_eq!(cfg.engine.fee.basis_points, 250);
        assert_eq!(cfg.engine.fee.recipient, PartyId([7u8; 32]));
    }

    #[test]
    fn coordinator_section_defaults() {
        let json = SAMPLE.replace(r#""coordinator": { "max_deal_lifetime_secs": 86400 },"#, "");
        let cfg = SettlementConfig::from_json_str(&json).unwrap();
        assert_eq!(
            cfg.coordinator.max_deal_lifetime_secs,
            constants::DEFAULT_MAX_DEAL_LIFETIME_SECS
        );
    }

    #[test]
    fn fee_above_cap_is_configuration_error() {
        let json = SAMPLE.replace("250", "2500");
        let err = SettlementConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, SettleError::Configuration(_)));
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = SettlementConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SettleError::Serialization(_)));
    }

    #[test]
    fn deadline_window() {
        let now = Utc::now();
        assert!(check_deadline("d", now, now + Duration::seconds(10), 60).is_ok());
        assert!(check_deadline("d", now, now + Duration::seconds(60), 60).is_ok());
        assert!(matches!(
            check_deadline("d", now, now, 60),
            Err(SettleError::DeadlineExpired(_))
        ));
        assert!(matches!(
            check_deadline("d", now, now + Duration::seconds(61), 60),
            Err(SettleError::InvalidDeadline { .. })
        ));
    }

    #[test]
    fn out_of_range_lifetime_is_configuration_error() {
        let json = SAMPLE.replace("86400", &i64::MAX.to_string());
        let err = SettlementConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, SettleError::Configuration(_)));

        let json = SAMPLE.replace("3600", "0");
        let err = SettlementConfig::from_json_str(&json).unwrap_err();
        assert!(matches!(err, SettleError::Configuration(_)));
    }

    #[test]
    fn deadline_check_with_out_of_range_lifetime_errors() {
        let now = Utc::now();
        assert!(matches!(
            check_deadline("d", now, now + Duration::seconds(10), i64::MAX),
            Err(SettleError::Configuration(_))
        ));
    }

    #[test]
    fn engine_config_defaults() {
        let cfg = EngineConfig::new(PartyId([1u8; 32]));
        assert_eq!(cfg.fee.basis_points, 0);
        assert!(cfg.max_instruction_lifetime_secs > 0);
    }
}
