//! Configuration schema definitions.
//!
//! This module defines the configuration structure for an exec client.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::entity::DEFAULT_CHUNK_SIZE;

/// Root configuration for the exec client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon endpoint and API version.
    pub endpoint: EndpointConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Input relay settings.
    pub relay: RelayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Where the container daemon listens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint URL (e.g., "unix:///var/run/docker.sock", "tcp://127.0.0.1:2375").
    pub address: String,

    /// API version path prefix (e.g., "v1.41"). Unversioned paths when absent.
    pub api_version: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: "unix:///var/run/docker.sock".to_string(),
            api_version: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// How long the upgrade handshake waits for a response, in milliseconds.
    pub handshake_wait_ms: u64,
}

impl TimeoutConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn handshake_wait(&self) -> Duration {
        Duration::from_millis(self.handshake_wait_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_wait_ms: 3000,
        }
    }
}

/// Input relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum bytes read from the input source per forwarded chunk.
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
