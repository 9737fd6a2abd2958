//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config/lendwise.toml.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::application::{OperationalRules, PipelineSettings, ScoringWeights};
use crate::domain::{RiskLevel, RiskProfile};

/// Main configuration structure matching config/lendwise.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineSection,
    pub scoring: ScoringSection,
    #[serde(default)]
    pub rules: RulesSection,
    pub risk: RiskSection,
    pub providers: ProvidersSection,
    #[serde(default)]
    pub knowledge: KnowledgeSection,
    pub logging: LoggingSection,
}

/// Run timing and data sources
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Whole-run deadline in seconds
    pub run_timeout_secs: u64,
    /// Per-source fetch deadline in seconds
    pub source_timeout_secs: u64,
    /// Maximum snapshot age in seconds
    pub snapshot_ttl_secs: u64,
    /// Protocols requested from the market provider
    pub protocols: Vec<String>,
    /// Protocols whose snapshots must be present and fresh on every run
    #[serde(default)]
    pub mandatory_protocols: Vec<String>,
}

/// Combined-score weights and yield model parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringSection {
    pub yield_weight: f64,
    pub risk_weight_low: f64,
    pub risk_weight_med: f64,
    pub risk_weight_high: f64,
    /// APY (%) that maps to a normalized yield score of 1.0
    pub yield_ceiling_pct: f64,
    /// Borrowed units per supplied unit on leveraged candidates (0 disables)
    pub leverage_ratio: f64,
    /// Slippage = coefficient * size / available liquidity, in percent
    pub slippage_coefficient: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesSection {
    /// Minimum acceptable expected yield percentage
    #[serde(default)]
    pub min_yield_pct: f64,
    /// Positions below this amount are never moved
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,
    /// Positions below this share of supplied value are held as they are
    #[serde(default = "default_min_position_allocation")]
    pub min_position_allocation: f64,
    /// Maximum number of positions worth more than `large_position_usd`
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_large_position_usd")]
    pub large_position_usd: f64,
}

fn default_min_position_size() -> f64 {
    1.0
}

fn default_min_position_allocation() -> f64 {
    0.10
}

fn default_max_positions() -> usize {
    5
}

fn default_large_position_usd() -> f64 {
    1000.0
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            min_yield_pct: 0.0,
            min_position_size: default_min_position_size(),
            min_position_allocation: default_min_position_allocation(),
            max_positions: default_max_positions(),
            large_position_usd: default_large_position_usd(),
        }
    }
}

/// One profile per risk level
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    pub low: ProfileSection,
    pub med: ProfileSection,
    pub high: ProfileSection,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProfileSection {
    pub max_ltv: f64,
    pub max_concentration_per_protocol: f64,
    pub min_liquidation_buffer: f64,
}

/// Where market and wallet data come from. A file path, when set, takes
/// precedence over the URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersSection {
    #[serde(default)]
    pub market_url: String,
    #[serde(default)]
    pub wallet_url: String,
    #[serde(default)]
    pub market_file: Option<String>,
    #[serde(default)]
    pub wallet_file: Option<String>,
}

impl ProvidersSection {
    /// Get market API URL with environment variable override
    /// Checks LENDWISE_MARKET_URL env var first, falls back to config value
    pub fn get_market_url(&self) -> String {
        std::env::var("LENDWISE_MARKET_URL").unwrap_or_else(|_| self.market_url.clone())
    }

    /// Checks LENDWISE_WALLET_URL env var first, falls back to config value
    pub fn get_wallet_url(&self) -> String {
        std::env::var("LENDWISE_WALLET_URL").unwrap_or_else(|_| self.wallet_url.clone())
    }

    /// Market fixture path with `~` expanded
    pub fn market_file_path(&self) -> Option<String> {
        expand(self.market_file.as_deref())
    }

    pub fn wallet_file_path(&self) -> Option<String> {
        expand(self.wallet_file.as_deref())
    }
}

fn expand(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| shellexpand::tilde(p).to_string())
}

/// Research facts served by the static knowledge base
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeSection {
    /// Protocol → historical reliability in [0, 1]
    #[serde(default)]
    pub reliability: BTreeMap<String, f64>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteEntry {
    pub topic: String,
    pub subject: String,
    pub note: String,
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = shellexpand::tilde(&path.as_ref().to_string_lossy()).to_string();
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate pipeline section
        if self.pipeline.run_timeout_secs == 0 || self.pipeline.source_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "run_timeout_secs and source_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.pipeline.source_timeout_secs > self.pipeline.run_timeout_secs {
            return Err(ConfigError::ValidationError(format!(
                "source_timeout_secs ({}) must not exceed run_timeout_secs ({})",
                self.pipeline.source_timeout_secs, self.pipeline.run_timeout_secs
            )));
        }

        if self.pipeline.snapshot_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "snapshot_ttl_secs must be > 0".to_string(),
            ));
        }

        if self.pipeline.protocols.is_empty() {
            return Err(ConfigError::ValidationError(
                "protocols cannot be empty".to_string(),
            ));
        }

        if let Some(p) = self
            .pipeline
            .mandatory_protocols
            .iter()
            .find(|p| !self.pipeline.protocols.contains(*p))
        {
            return Err(ConfigError::ValidationError(format!(
                "mandatory protocol {} is not in protocols",
                p
            )));
        }

        // Validate scoring section
        if self.scoring.yield_ceiling_pct <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "yield_ceiling_pct must be > 0, got {}",
                self.scoring.yield_ceiling_pct
            )));
        }

        if self.scoring.slippage_coefficient < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "slippage_coefficient must be >= 0, got {}",
                self.scoring.slippage_coefficient
            )));
        }

        // Validate risk profiles
        for level in RiskLevel::ALL {
            self.profile(level)
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        // Validate providers
        if self.providers.market_file_path().is_none() && self.providers.market_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "providers needs market_url or market_file".to_string(),
            ));
        }

        if self.providers.wallet_file_path().is_none() && self.providers.wallet_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "providers needs wallet_url or wallet_file".to_string(),
            ));
        }

        // Validate knowledge
        if let Some((protocol, score)) = self
            .knowledge
            .reliability
            .iter()
            .find(|(_, r)| !(0.0..=1.0).contains(*r))
        {
            return Err(ConfigError::ValidationError(format!(
                "reliability for {} must be 0-1, got {}",
                protocol, score
            )));
        }

        // Validate logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level {}",
                self.logging.level
            )));
        }

        self.pipeline_settings()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(())
    }

    pub fn profile(&self, level: RiskLevel) -> RiskProfile {
        let section = match level {
            RiskLevel::Low => self.risk.low,
            RiskLevel::Med => self.risk.med,
            RiskLevel::High => self.risk.high,
        };
        RiskProfile {
            level,
            max_ltv: section.max_ltv,
            max_concentration_per_protocol: section.max_concentration_per_protocol,
            min_liquidation_buffer: section.min_liquidation_buffer,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            run_timeout: Duration::from_secs(self.pipeline.run_timeout_secs),
            source_timeout: Duration::from_secs(self.pipeline.source_timeout_secs),
            snapshot_ttl: Duration::from_secs(self.pipeline.snapshot_ttl_secs),
            protocols: self.pipeline.protocols.clone(),
            mandatory_protocols: self.pipeline.mandatory_protocols.clone(),
            leverage_ratio: self.scoring.leverage_ratio,
            weights: ScoringWeights {
                yield_weight: self.scoring.yield_weight,
                risk_weight_low: self.scoring.risk_weight_low,
                risk_weight_med: self.scoring.risk_weight_med,
                risk_weight_high: self.scoring.risk_weight_high,
            },
            rules: OperationalRules {
                min_yield_pct: self.rules.min_yield_pct,
                min_position_size: self.rules.min_position_size,
                min_position_allocation: self.rules.min_position_allocation,
                max_positions: self.rules.max_positions,
                large_position_usd: self.rules.large_position_usd,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[pipeline]
run_timeout_secs = 30
source_timeout_secs = 10
snapshot_ttl_secs = 300
protocols = ["kamino", "marginfi", "solend"]
mandatory_protocols = ["kamino"]

[scoring]
yield_weight = 1.0
risk_weight_low = 1.0
risk_weight_med = 0.6
risk_weight_high = 0.3
yield_ceiling_pct = 25.0
leverage_ratio = 1.5
slippage_coefficient = 0.5

[rules]
min_yield_pct = 4.0
min_position_size = 1.0

[risk.low]
max_ltv = 0.30
max_concentration_per_protocol = 0.2
min_liquidation_buffer = 0.5

[risk.med]
max_ltv = 0.50
max_concentration_per_protocol = 0.4
min_liquidation_buffer = 0.3

[risk.high]
max_ltv = 0.65
max_concentration_per_protocol = 0.6
min_liquidation_buffer = 0.15

[providers]
market_url = "http://localhost:3001"
wallet_url = "http://localhost:3001"

[knowledge]
reliability = { kamino = 0.9, solend = 0.7 }

[[knowledge.notes]]
topic = "incidents"
subject = "solend"
note = "Oracle incident, Nov 2022"

[logging]
level = "info"
"#
        .to_string()
    }

    fn load_str(content: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load_config(file.path())
    }

    #[test]
    fn test_load_valid_config() {
        let config = load_str(&create_valid_config()).unwrap();

        assert_eq!(config.pipeline.protocols.len(), 3);
        assert_eq!(config.pipeline.mandatory_protocols, vec!["kamino"]);
        assert_eq!(config.rules.min_yield_pct, 4.0);
        assert_eq!(config.knowledge.reliability["kamino"], 0.9);
        assert_eq!(config.knowledge.notes.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let result = load_str("[pipeline\nrun_timeout_secs = 30");
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_profiles_and_settings() {
        let config = load_str(&create_valid_config()).unwrap();

        let low = config.profile(RiskLevel::Low);
        assert_eq!(low.level, RiskLevel::Low);
        assert_eq!(low.max_concentration_per_protocol, 0.2);
        assert_eq!(config.profile(RiskLevel::High).max_ltv, 0.65);

        let settings = config.pipeline_settings();
        assert_eq!(settings.snapshot_ttl, Duration::from_secs(300));
        assert_eq!(settings.weights.risk_weight(RiskLevel::Med), 0.6);
        assert_eq!(settings.rules.min_position_size, 1.0);
    }

    #[test]
    fn test_invalid_profile() {
        let invalid = create_valid_config().replace(
            "[risk.high]\nmax_ltv = 0.65",
            "[risk.high]\nmax_ltv = 1.65",
        );
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_source_timeout_above_run_timeout() {
        let invalid = create_valid_config().replace("source_timeout_secs = 10", "source_timeout_secs = 60");
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_unknown_mandatory_protocol() {
        let invalid = create_valid_config().replace(
            "mandatory_protocols = [\"kamino\"]",
            "mandatory_protocols = [\"drift\"]",
        );
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_inverted_risk_weights() {
        let invalid = create_valid_config().replace("risk_weight_high = 0.3", "risk_weight_high = 2.0");
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_providers_need_a_source() {
        let invalid = create_valid_config().replace(
            "market_url = \"http://localhost:3001\"\n",
            "",
        );
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));

        let with_file = create_valid_config().replace(
            "market_url = \"http://localhost:3001\"\n",
            "market_file = \"demos/market.json\"\n",
        );
        let config = load_str(&with_file).unwrap();
        assert_eq!(config.providers.market_file_path().as_deref(), Some("demos/market.json"));
    }

    #[test]
    fn test_rules_section_optional() {
        let without_rules = create_valid_config().replace(
            "[rules]\nmin_yield_pct = 4.0\nmin_position_size = 1.0\n",
            "",
        );
        let config = load_str(&without_rules).unwrap();
        assert_eq!(config.rules.min_yield_pct, 0.0);
        assert_eq!(config.rules.min_position_size, 1.0);
        assert_eq!(config.rules.min_position_allocation, 0.10);
        assert_eq!(config.rules.max_positions, 5);
        assert_eq!(config.rules.large_position_usd, 1000.0);
    }

    #[test]
    fn test_position_rules() {
        let custom = create_valid_config().replace(
            "min_position_size = 1.0\n",
            "min_position_size = 1.0\nmin_position_allocation = 0.05\nmax_positions = 3\n",
        );
        let settings = load_str(&custom).unwrap().pipeline_settings();
        assert_eq!(settings.rules.min_position_allocation, 0.05);
        assert_eq!(settings.rules.max_positions, 3);

        let invalid = create_valid_config().replace(
            "min_position_size = 1.0\n",
            "min_position_size = 1.0\nmin_position_allocation = 1.5\n",
        );
        assert!(matches!(
            load_str(&invalid).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }
}
