//! Configuration for the vote-escrow core.
//!
//! Provides structured configuration with validation for every component.
//!
//! # Configuration Sources
//!
//! Configuration can be loaded from:
//! - Environment variables (prefixed with `VE_`)
//! - JSON documents (`VeConfig::from_json_str`), missing fields take defaults
//! - Programmatic defaults and the builder
//!
//! # Example
//!
//! ```rust
//! use ve_core::config::VeConfig;
//!
//! let config = VeConfig::builder()
//!     .escrow_max_replay_weeks(128)
//!     .vote_cooldown_secs(86_400)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.gauges.vote_cooldown_secs, 86_400);
//! ```

use crate::time::{Timestamp, DAY, WEEK};
use crate::{Result, VeError};
use serde::{Deserialize, Serialize};

/// Upper bound for any replay cap; a single call never walks more than ~20 years of weeks.
pub const HARD_MAX_REPLAY_WEEKS: u64 = 1_040;

/// Upper bound for accounts processed by one `claim_many`.
pub const HARD_MAX_CLAIM_MANY: usize = 256;

/// Complete configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VeConfig {
    /// Escrow ledger configuration.
    pub escrow: EscrowConfig,

    /// Gauge controller configuration.
    pub gauges: GaugeConfig,

    /// Fee distributor configuration.
    pub fees: FeeConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl VeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> VeConfigBuilder {
        VeConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Looks for variables prefixed with `VE_`:
    /// - `VE_ESCROW_MAX_REPLAY_WEEKS` - Weeks a global escrow replay may cover per call
    /// - `VE_GAUGE_MAX_REPLAY_WEEKS` - Weeks a gauge curve fill may cover per call
    /// - `VE_VOTE_COOLDOWN_SECS` - Minimum delay between votes on the same gauge
    /// - `VE_TOKEN_CHECKPOINT_DEADLINE_SECS` - Minimum delay between public token checkpoints
    /// - `VE_FEE_MAX_CLAIM_WEEKS` - Weeks a single claim may walk
    /// - `VE_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("VE_ESCROW_MAX_REPLAY_WEEKS")? {
            config.escrow.max_replay_weeks = v;
        }
        if let Some(v) = env_parse("VE_GAUGE_MAX_REPLAY_WEEKS")? {
            config.gauges.max_replay_weeks = v;
        }
        if let Some(v) = env_parse("VE_VOTE_COOLDOWN_SECS")? {
            config.gauges.vote_cooldown_secs = v;
        }
        if let Some(v) = env_parse("VE_TOKEN_CHECKPOINT_DEADLINE_SECS")? {
            config.fees.token_checkpoint_deadline_secs = v;
        }
        if let Some(v) = env_parse("VE_FEE_MAX_CLAIM_WEEKS")? {
            config.fees.max_claim_weeks = v;
        }
        if let Ok(level) = std::env::var("VE_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; absent sections and fields keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: VeConfig = serde_json::from_str(s)
            .map_err(|e| VeError::ConfigError(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.escrow.validate()?;
        self.gauges.validate()?;
        self.fees.validate()?;
        self.logging.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| VeError::ConfigError(format!("Invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn validate_replay_cap(name: &str, v: u64) -> Result<()> {
    if v == 0 || v > HARD_MAX_REPLAY_WEEKS {
        return Err(VeError::ConfigError(format!(
            "{name} must be between 1 and {HARD_MAX_REPLAY_WEEKS}"
        )));
    }
    Ok(())
}

/// Escrow ledger configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Weekly steps a global replay may take in one call.
    pub max_replay_weeks: u64,
}

impl EscrowConfig {
    pub fn validate(&self) -> Result<()> {
        validate_replay_cap("escrow.max_replay_weeks", self.max_replay_weeks)
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            max_replay_weeks: 255,
        }
    }
}

/// Gauge controller configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaugeConfig {
    /// Minimum delay between two votes by one account on one gauge.
    pub vote_cooldown_secs: Timestamp,

    /// Weekly steps a gauge or type curve fill may take in one call.
    pub max_replay_weeks: u64,
}

impl GaugeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.vote_cooldown_secs > 52 * WEEK {
            return Err(VeError::ConfigError(
                "gauges.vote_cooldown_secs must not exceed one year".into(),
            ));
        }
        validate_replay_cap("gauges.max_replay_weeks", self.max_replay_weeks)
    }
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            vote_cooldown_secs: 10 * DAY,
            max_replay_weeks: 500,
        }
    }
}

/// Fee distributor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Minimum delay between token checkpoints triggered by non-admin callers.
    pub token_checkpoint_deadline_secs: Timestamp,

    /// Weeks one token checkpoint may distribute into.
    pub max_token_weeks: u64,

    /// Weeks of ve-supply one supply checkpoint may record.
    pub max_supply_weeks: u64,

    /// Weeks one claim may walk for one account.
    pub max_claim_weeks: u64,

    /// Accounts one `claim_many` may process.
    pub max_claim_many: usize,
}

impl FeeConfig {
    pub fn validate(&self) -> Result<()> {
        validate_replay_cap("fees.max_token_weeks", self.max_token_weeks)?;
        validate_replay_cap("fees.max_supply_weeks", self.max_supply_weeks)?;
        validate_replay_cap("fees.max_claim_weeks", self.max_claim_weeks)?;
        if self.max_claim_many == 0 || self.max_claim_many > HARD_MAX_CLAIM_MANY {
            return Err(VeError::ConfigError(format!(
                "fees.max_claim_many must be between 1 and {HARD_MAX_CLAIM_MANY}"
            )));
        }
        if self.token_checkpoint_deadline_secs > WEEK {
            return Err(VeError::ConfigError(
                "fees.token_checkpoint_deadline_secs must not exceed one week".into(),
            ));
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            token_checkpoint_deadline_secs: DAY,
            max_token_weeks: 20,
            max_supply_weeks: 20,
            max_claim_weeks: 50,
            max_claim_many: 20,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive (e.g. `info,ve_core::gauge=debug`).
    pub level: String,

    /// Whether to include timestamps in logs.
    pub include_timestamps: bool,

    /// Whether to include span context in logs.
    pub include_spans: bool,

    /// JSON output format.
    pub json_output: bool,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(VeError::ConfigError("logging.level must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            include_timestamps: true,
            include_spans: true,
            json_output: false,
        }
    }
}

/// Builder for VeConfig.
#[derive(Default)]
pub struct VeConfigBuilder {
    config: VeConfig,
}

impl VeConfigBuilder {
    pub fn escrow_max_replay_weeks(mut self, weeks: u64) -> Self {
        self.config.escrow.max_replay_weeks = weeks;
        self
    }

    pub fn gauge_max_replay_weeks(mut self, weeks: u64) -> Self {
        self.config.gauges.max_replay_weeks = weeks;
        self
    }

    pub fn vote_cooldown_secs(mut self, secs: Timestamp) -> Self {
        self.config.gauges.vote_cooldown_secs = secs;
        self
    }

    pub fn token_checkpoint_deadline_secs(mut self, secs: Timestamp) -> Self {
        self.config.fees.token_checkpoint_deadline_secs = secs;
        self
    }

    pub fn fee_max_token_weeks(mut self, weeks: u64) -> Self {
        self.config.fees.max_token_weeks = weeks;
        self
    }

    pub fn fee_max_supply_weeks(mut self, weeks: u64) -> Self {
        self.config.fees.max_supply_weeks = weeks;
        self
    }

    pub fn fee_max_claim_weeks(mut self, weeks: u64) -> Self {
        self.config.fees.max_claim_weeks = weeks;
        self
    }

    pub fn max_claim_many(mut self, n: usize) -> Self {
        self.config.fees.max_claim_many = n;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn json_logs(mut self, json: bool) -> Self {
        self.config.logging.json_output = json;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<VeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
