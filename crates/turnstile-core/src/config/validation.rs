//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_runner(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_runner(config: &Config) -> Result<()> {
    if config.runner.timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            field: "runner.timeout_ms".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into());
    }

    if config.runner.poll_interval_ms == 0 {
        return Err(ConfigError::InvalidValue {
            field: "runner.poll_interval_ms".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into());
    }

    if config.runner.poll_interval_ms > config.runner.timeout_ms {
        return Err(ConfigError::InvalidValue {
            field: "runner.poll_interval_ms".to_string(),
            message: "cannot exceed runner.timeout_ms".to_string(),
        }
        .into());
    }

    Ok(())
}
