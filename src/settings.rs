//! Queue configuration loaded through the `config` crate.
//!
//! Settings are grouped into three sections that map directly onto the
//! configuration keys consumed by the queue client:
//!
//! - `connection.*` — endpoint identity (region, account, resource/queue
//!   names, dead-letter queue, or a whole ARN)
//! - `credential.*` — access credentials (`access_id`/`access_key`, with
//!   `client_id`/`client_key` accepted as aliases)
//! - `options.*` — client tuning (listen poll interval)
//!
//! All fields carry serde defaults so a partially configured source still
//! deserializes; validation of required values happens at resolve/open time,
//! not at load time.

use crate::error::ConfigurationError;
use serde::Deserialize;

/// Default listen poll interval in milliseconds
const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Full configuration for a queue client instance
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub credential: CredentialSettings,
    #[serde(default)]
    pub options: OptionsSettings,
}

/// Endpoint identity settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionSettings {
    pub partition: Option<String>,
    pub service: Option<String>,
    pub region: Option<String>,
    pub account: Option<String>,
    pub resource_type: Option<String>,
    pub resource: Option<String>,
    pub queue: Option<String>,
    pub dead_queue: Option<String>,
    pub arn: Option<String>,
}

/// Access credential settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialSettings {
    #[serde(alias = "client_id")]
    pub access_id: Option<String>,
    #[serde(alias = "client_key")]
    pub access_key: Option<String>,
}

/// Client tuning options
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsSettings {
    /// Listen loop sleep between empty polls, in milliseconds
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl Default for OptionsSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL_MS,
        }
    }
}

impl QueueSettings {
    /// Load settings from a TOML or YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(true))
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })
    }

    /// Load settings from environment variables with the given prefix.
    ///
    /// Uses a double-underscore separator, so with prefix `SQS` the variable
    /// `SQS__CONNECTION__REGION=us-east-1` sets `connection.region`.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix).separator("__"))
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        config
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
