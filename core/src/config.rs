//! Configuration for a privately owned transport handle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid transport config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Settings used to build a transport handle the operation owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for the whole request, head and body included.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub user_agent: String,
    pub max_idle_connections: usize,
    /// Responses larger than this fail with `BodyTooLarge`.
    pub max_response_bytes: u64,
    /// Chunk size used when delivering incremental data events.
    pub read_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(60),
            connect_timeout_secs: None,
            user_agent: concat!("netop/", env!("CARGO_PKG_VERSION")).to_string(),
            max_idle_connections: 10,
            max_response_bytes: 10 * 1024 * 1024,
            read_chunk_size: 16 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Defaults overridden by `NETOP_TIMEOUT_SECS`, `NETOP_USER_AGENT` and
    /// `NETOP_MAX_RESPONSE_BYTES` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("NETOP_TIMEOUT_SECS") {
            let secs = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "NETOP_TIMEOUT_SECS",
                value: value.clone(),
            })?;
            self.timeout_secs = Some(secs);
        }
        if let Some(value) = lookup("NETOP_USER_AGENT") {
            self.user_agent = value;
        }
        if let Some(value) = lookup("NETOP_MAX_RESPONSE_BYTES") {
            self.max_response_bytes = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "NETOP_MAX_RESPONSE_BYTES",
                value: value.clone(),
            })?;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}
