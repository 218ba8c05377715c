//! Broker configuration.
//!
//! ```yaml
//! vocabulary:
//!   confirm: [confirm, ok, yes]
//!   deny: [deny, cancel, no]
//! default_ttl_secs: 15
//! sweep_interval_ms: 1000
//! max_active_requests: 100   # null for unbounded
//! messages:
//!   no_request: "Nothing to confirm."
//! ```
//!
//! | Environment Variable | Overrides |
//! |---------------------|-----------|
//! | `DOUBLECHECK_DEFAULT_TTL_SECS` | `default_ttl_secs` |
//! | `DOUBLECHECK_SWEEP_INTERVAL_MS` | `sweep_interval_ms` |

use crate::command::{Decision, Vocabulary};
use crate::error::ConfigError;
use crate::messages::Messages;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_DEFAULT_TTL_SECS: &str = "DOUBLECHECK_DEFAULT_TTL_SECS";
pub const ENV_SWEEP_INTERVAL_MS: &str = "DOUBLECHECK_SWEEP_INTERVAL_MS";

pub const DEFAULT_TTL_SECS: u64 = 15;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_ACTIVE_REQUESTS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub vocabulary: Vocabulary,
    /// TTL for requests that do not set their own.
    pub default_ttl_secs: u64,
    pub sweep_interval_ms: u64,
    pub max_active_requests: Option<usize>,
    pub messages: Messages,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            max_active_requests: Some(DEFAULT_MAX_ACTIVE_REQUESTS),
            messages: Messages::default(),
        }
    }
}

impl BrokerConfig {
    /// Read, parse and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults".
        let cfg: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `DOUBLECHECK_*` environment overrides, then re-validate.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(ttl) = env_u64(ENV_DEFAULT_TTL_SECS)? {
            self.default_ttl_secs = ttl;
        }
        if let Some(interval) = env_u64(ENV_SWEEP_INTERVAL_MS)? {
            self.sweep_interval_ms = interval;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vocabulary.confirm.is_empty() || self.vocabulary.deny.is_empty() {
            return Err(invalid("vocabulary needs at least one confirm and one deny word"));
        }
        if let Some(word) = self
            .vocabulary
            .words()
            .find(|w| w.trim().trim_start_matches('/').is_empty())
        {
            return Err(invalid(format!("blank vocabulary word {word:?}")));
        }
        if let Some(word) = self
            .vocabulary
            .deny
            .iter()
            .find(|w| self.vocabulary.classify(w) == Some(Decision::Confirm))
        {
            return Err(invalid(format!("{word:?} is both a confirm and a deny word")));
        }
        if self.default_ttl_secs == 0 {
            return Err(invalid("default_ttl_secs must be > 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid("sweep_interval_ms must be > 0"));
        }
        if self.max_active_requests == Some(0) {
            return Err(invalid("max_active_requests must be > 0 (or null for unbounded)"));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(format!("{name}={raw:?} is not a non-negative integer"))),
        Err(_) => Ok(None),
    }
}
