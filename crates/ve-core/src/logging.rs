//! Tracing subscriber setup for hosts embedding the core.
//!
//! The core itself only emits `tracing` events; installing a subscriber is the host's call.

use crate::config::LoggingConfig;
use crate::{Result, VeError};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG` when set, else from `config.level`.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| VeError::ConfigError(format!("invalid log filter '{}': {e}", config.level)))
}

/// Install a global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    config.validate()?;
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.include_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let installed = match (config.json_output, config.include_timestamps) {
        (true, true) => builder.json().try_init(),
        (true, false) => builder.json().without_time().try_init(),
        (false, true) => builder.try_init(),
        (false, false) => builder.without_time().try_init(),
    };
    installed.map_err(|e| VeError::ConfigError(format!("tracing init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_directives() {
        let config = LoggingConfig {
            level: "ve_core=notalevel".into(),
            ..LoggingConfig::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(env_filter(&config), Err(VeError::ConfigError(_))));
        }
    }

    #[test]
    fn accepts_module_directives() {
        let config = LoggingConfig {
            level: "info,ve_core::gauge=debug".into(),
            ..LoggingConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }
}
