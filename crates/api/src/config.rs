//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use itemkeep_infra::{FaultPolicy, PoolConfig, ProcessorConfig};

pub const BIND_ADDR_VAR: &str = "ITEMKEEP_BIND_ADDR";
pub const WORKERS_VAR: &str = "ITEMKEEP_WORKERS";
pub const TASK_DELAY_VAR: &str = "ITEMKEEP_TASK_DELAY_MS";
pub const FAULT_POLICY_VAR: &str = "ITEMKEEP_FAULT_POLICY";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub pool: PoolConfig,
    pub processor: ProcessorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            pool: PoolConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(BIND_ADDR_VAR) {
            config.bind_addr = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(BIND_ADDR_VAR, &value, e))?;
        }

        if let Some(value) = lookup(WORKERS_VAR) {
            let size: usize = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(WORKERS_VAR, &value, e))?;
            if size == 0 {
                return Err(ConfigError::invalid(WORKERS_VAR, &value, "must be at least 1"));
            }
            config.pool = config.pool.with_size(size);
        }

        if let Some(value) = lookup(TASK_DELAY_VAR) {
            let ms: u64 = value
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid(TASK_DELAY_VAR, &value, e))?;
            config.processor = config.processor.with_task_delay(Duration::from_millis(ms));
        }

        if let Some(value) = lookup(FAULT_POLICY_VAR) {
            let policy: FaultPolicy = value
                .parse()
                .map_err(|e: String| ConfigError::invalid(FAULT_POLICY_VAR, &value, e))?;
            config.processor = config.processor.with_fault_policy(policy);
        }

        Ok(config)
    }
}
