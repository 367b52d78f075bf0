//! Subscription Configuration
//!
//! Timing and naming knobs shared by the client manager and the server
//! resolver. Every field has a default, so an empty JSON object is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Subscription subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Debounce window for id subscriptions, reset on every addition
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval between keepalive renewal rounds
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Lifetime granted by the server on registration and renewal
    #[serde(default = "default_subscription_ttl_secs")]
    pub subscription_ttl_secs: u64,

    /// Prefix of private transport channels
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Namespace of subscriber-set cache keys
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Team whose shared channel this client binds (client side)
    #[serde(default)]
    pub team_id: Option<String>,

    /// Number of received events retained for diagnostics
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,

    /// Keys requested per cursor page when scanning the cache
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_keepalive_interval_secs() -> u64 {
    240
}

fn default_subscription_ttl_secs() -> u64 {
    600
}

fn default_channel_prefix() -> String {
    "private-".to_string()
}

fn default_cache_prefix() -> String {
    "subscribe:".to_string()
}

fn default_diagnostics_capacity() -> usize {
    100
}

fn default_scan_page_size() -> usize {
    100
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            subscription_ttl_secs: default_subscription_ttl_secs(),
            channel_prefix: default_channel_prefix(),
            cache_prefix: default_cache_prefix(),
            team_id: None,
            diagnostics_capacity: default_diagnostics_capacity(),
            scan_page_size: default_scan_page_size(),
        }
    }
}

impl LiveConfig {
    /// Client configuration bound to a team channel
    pub fn for_team(team_id: impl Into<String>) -> Self {
        Self {
            team_id: Some(team_id.into()),
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: LiveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject values that would disable timers or collapse key namespaces
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debounce_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.keepalive_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "keepalive_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.keepalive_interval_secs >= self.subscription_ttl_secs {
            return Err(ConfigError::InvalidValue {
                field: "keepalive_interval_secs",
                reason: format!(
                    "must be shorter than subscription_ttl_secs ({})",
                    self.subscription_ttl_secs
                ),
            });
        }
        if self.cache_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache_prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.scan_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_page_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn subscription_ttl(&self) -> Duration {
        Duration::from_secs(self.subscription_ttl_secs)
    }

    /// Transport channel name for a resource type and team or scope id
    pub fn channel_name(&self, resource_type: &str, scope_id: &str) -> String {
        format!("{}{}.{}", self.channel_prefix, resource_type, scope_id)
    }

    /// Flat key list used when the cache cannot pattern-scan
    pub fn index_key(&self) -> String {
        format!("{}_index", self.cache_prefix)
    }
}
