use std::fmt;

use serde::{Deserialize, Serialize};

/// Which scoring component produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Producer {
    Risk,
    Yield,
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Risk => write!(f, "risk"),
            Producer::Yield => write!(f, "yield"),
        }
    }
}

/// One component's opinion about a placement or candidate move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub producer: Producer,
    pub protocol: String,
    pub asset: String,
    /// Normalized to [0, 1]. Yield: higher is better. Risk: lower is safer.
    pub score: f64,
    pub confidence: f64,
    /// Raw metric behind the score (expected APY %, or the risk score)
    pub value: f64,
    /// False vetoes the candidate regardless of score
    pub approved: bool,
    /// Reliability of the protocol behind the signal, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
    pub rationale: Vec<String>,
}

impl Signal {
    pub fn new(producer: Producer, protocol: &str, asset: &str, score: f64, value: f64) -> Self {
        Self {
            producer,
            protocol: protocol.to_string(),
            asset: asset.to_string(),
            score,
            confidence: 1.0,
            value,
            approved: true,
            reliability: None,
            rationale: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = Some(reliability);
        self
    }

    pub fn with_rationale(mut self, line: impl Into<String>) -> Self {
        self.rationale.push(line.into());
        self
    }

    pub fn vetoed(mut self) -> Self {
        self.approved = false;
        self
    }

    /// Calculates confidence based on z-score using standard normal CDF
    /// Confidence ranges from 0.0 to 1.0
    pub fn calculate_confidence(z_score: f64) -> f64 {
        use statrs::function::erf::erf;
        // Standard normal CDF: Φ(z) = 0.5 * (1 + erf(z / sqrt(2)))
        0.5 * (1.0 + erf(z_score / f64::sqrt(2.0)))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.score.is_nan() || self.score < 0.0 || self.score > 1.0 {
            return Err(format!("Invalid score value: {}", self.score));
        }
        if self.confidence.is_nan() || self.confidence < 0.0 || self.confidence > 1.0 {
            return Err(format!("Invalid confidence value: {}", self.confidence));
        }
        Ok(())
    }
}
