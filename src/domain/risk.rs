use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskViolation {
    #[error("LTV exceeds profile max ({0:.3} > {1:.3})")]
    LtvExceeded(f64, f64),

    #[error("Concentration exceeds profile max ({0:.3} > {1:.3})")]
    ConcentrationExceeded(f64, f64),

    #[error("Liquidation buffer below profile min ({0:.3} < {1:.3})")]
    LiquidationBufferTooThin(f64, f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Unknown risk level '{0}' (expected low, med or high)")]
    UnknownLevel(String),

    #[error("No risk profile configured for level {0}")]
    MissingProfile(RiskLevel),

    #[error("Invalid risk profile for {level}: {reason}")]
    Invalid { level: RiskLevel, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Med, RiskLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Med => "med",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "med" | "medium" => Ok(RiskLevel::Med),
            "high" => Ok(RiskLevel::High),
            other => Err(ProfileError::UnknownLevel(other.to_string())),
        }
    }
}

/// Risk limits for one run, loaded once from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub level: RiskLevel,
    pub max_ltv: f64,
    pub max_concentration_per_protocol: f64,
    pub min_liquidation_buffer: f64,
}

impl RiskProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |reason: String| ProfileError::Invalid {
            level: self.level,
            reason,
        };

        if !(0.0..1.0).contains(&self.max_ltv) {
            return Err(invalid(format!("max_ltv must be in [0, 1), got {}", self.max_ltv)));
        }
        if self.max_concentration_per_protocol <= 0.0 || self.max_concentration_per_protocol > 1.0 {
            return Err(invalid(format!(
                "max_concentration_per_protocol must be in (0, 1], got {}",
                self.max_concentration_per_protocol
            )));
        }
        if !(0.0..=1.0).contains(&self.min_liquidation_buffer) {
            return Err(invalid(format!(
                "min_liquidation_buffer must be in [0, 1], got {}",
                self.min_liquidation_buffer
            )));
        }
        Ok(())
    }
}

/// Outcome of assessing one candidate move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub approved: bool,
    /// Weighted margin usage in [0, 1]; lower is safer
    pub risk_score: f64,
    pub reasons: Vec<String>,
}

pub trait RiskCheck {
    fn validate_ltv(&self, ltv: f64) -> Result<(), RiskViolation>;
    /// `baseline` is the wallet's largest concentration before the move
    fn validate_concentration(&self, concentration: f64, baseline: f64) -> Result<(), RiskViolation>;
    fn validate_liquidation_buffer(&self, buffer: f64) -> Result<(), RiskViolation>;
}

impl RiskCheck for RiskProfile {
    fn validate_ltv(&self, ltv: f64) -> Result<(), RiskViolation> {
        if ltv > self.max_ltv {
            Err(RiskViolation::LtvExceeded(ltv, self.max_ltv))
        } else {
            Ok(())
        }
    }

    fn validate_concentration(&self, concentration: f64, baseline: f64) -> Result<(), RiskViolation> {
        // A move that does not concentrate the wallet further is not a breach
        if concentration > self.max_concentration_per_protocol && concentration > baseline + 1e-9 {
            Err(RiskViolation::ConcentrationExceeded(
                concentration,
                self.max_concentration_per_protocol,
            ))
        } else {
            Ok(())
        }
    }

    fn validate_liquidation_buffer(&self, buffer: f64) -> Result<(), RiskViolation> {
        if buffer < self.min_liquidation_buffer {
            Err(RiskViolation::LiquidationBufferTooThin(buffer, self.min_liquidation_buffer))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> RiskProfile {
        RiskProfile {
            level: RiskLevel::Med,
            max_ltv: 0.5,
            max_concentration_per_protocol: 0.4,
            min_liquidation_buffer: 0.3,
        }
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("low".parse::<RiskLevel>().unwrap(), RiskLevel::Low);
        assert_eq!("Medium".parse::<RiskLevel>().unwrap(), RiskLevel::Med);
        assert_eq!(" HIGH ".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!(matches!("yolo".parse::<RiskLevel>(), Err(ProfileError::UnknownLevel(_))));
    }

    #[test]
    fn test_ltv_validation() {
        let p = profile();
        assert!(p.validate_ltv(0.0).is_ok());
        assert!(p.validate_ltv(0.5).is_ok());
        let err = p.validate_ltv(0.75).unwrap_err();
        assert!(err.to_string().starts_with("LTV exceeds profile max"));
    }

    #[test]
    fn test_concentration_validation() {
        let p = profile();
        assert!(p.validate_concentration(0.3, 0.0).is_ok());
        assert!(p.validate_concentration(0.6, 0.2).is_err());
        // Already fully concentrated: moving the whole position is not worse
        assert!(p.validate_concentration(1.0, 1.0).is_ok());
    }

    #[test]
    fn test_buffer_validation() {
        let p = profile();
        assert!(p.validate_liquidation_buffer(1.0).is_ok());
        assert!(p.validate_liquidation_buffer(0.3).is_ok());
        assert!(p.validate_liquidation_buffer(0.29).is_err());
    }

    #[test]
    fn test_profile_validation() {
        assert!(profile().validate().is_ok());

        let mut bad = profile();
        bad.max_ltv = 1.2;
        assert!(matches!(bad.validate(), Err(ProfileError::Invalid { .. })));

        let mut bad = profile();
        bad.max_concentration_per_protocol = 0.0;
        assert!(bad.validate().is_err());
    }
}
