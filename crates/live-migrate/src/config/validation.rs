//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.base.url.is_empty() {
        return Err(MigrateError::Config("base.url is required".into()));
    }
    if config.target.url.is_empty() {
        return Err(MigrateError::Config("target.url is required".into()));
    }

    // Cannot migrate a store onto itself
    if config.base.url == config.target.url {
        return Err(MigrateError::Config(
            "base and target cannot be the same store".into(),
        ));
    }

    for (name, store) in [("base", &config.base), ("target", &config.target)] {
        if store.max_connections == 0 {
            return Err(MigrateError::Config(format!(
                "{name}.max_connections must be at least 1"
            )));
        }
        if store.acquire_timeout_secs == 0 {
            return Err(MigrateError::Config(format!(
                "{name}.acquire_timeout_secs must be at least 1"
            )));
        }
    }

    let v = &config.validator;
    if v.batch_size == 0 {
        return Err(MigrateError::Config(
            "validator.batch_size must be at least 1".into(),
        ));
    }
    if v.call_timeout_ms == 0 {
        return Err(MigrateError::Config(
            "validator.call_timeout_ms must be at least 1".into(),
        ));
    }
    if v.max_consecutive_errors == 0 {
        return Err(MigrateError::Config(
            "validator.max_consecutive_errors must be at least 1".into(),
        ));
    }

    let r = &config.repair;
    if r.channel_capacity == 0 {
        return Err(MigrateError::Config(
            "repair.channel_capacity must be at least 1".into(),
        ));
    }
    if r.max_attempts == 0 {
        return Err(MigrateError::Config(
            "repair.max_attempts must be at least 1".into(),
        ));
    }
    if r.call_timeout_ms == 0 {
        return Err(MigrateError::Config(
            "repair.call_timeout_ms must be at least 1".into(),
        ));
    }

    Ok(())
}
