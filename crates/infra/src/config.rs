use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;

pub const MAX_COMMAND_ATTEMPTS_ENV: &str = "KEEL_MAX_COMMAND_ATTEMPTS";
pub const TYPE_MAPPING_TIMEOUT_ENV: &str = "KEEL_TYPE_MAPPING_TIMEOUT_MS";
pub const PUBLICATION_TIMEOUT_ENV: &str = "KEEL_PUBLICATION_TIMEOUT_MS";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per command before a conflict streak becomes fatal.
    pub max_command_attempts: u32,
    /// Bound on waiting for another task's registration of the same type.
    pub type_mapping_wait_timeout: Duration,
    /// Default wait used by `send_and_wait`.
    pub publication_wait_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_command_attempts: 10,
            type_mapping_wait_timeout: Duration::from_secs(5),
            publication_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_max_command_attempts(mut self, attempts: u32) -> Self {
        self.max_command_attempts = attempts;
        self
    }

    pub fn with_type_mapping_wait_timeout(mut self, timeout: Duration) -> Self {
        self.type_mapping_wait_timeout = timeout;
        self
    }

    pub fn with_publication_wait_timeout(mut self, timeout: Duration) -> Self {
        self.publication_wait_timeout = timeout;
        self
    }

    /// Defaults overridden by `KEEL_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(attempts) = parse_var::<u32>(&lookup, MAX_COMMAND_ATTEMPTS_ENV) {
            config.max_command_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, TYPE_MAPPING_TIMEOUT_ENV) {
            config.type_mapping_wait_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, PUBLICATION_TIMEOUT_ENV) {
            config.publication_wait_timeout = Duration::from_millis(ms);
        }
        config
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_command_attempts == 0 {
            return Err(EngineError::Config(
                "max_command_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}
