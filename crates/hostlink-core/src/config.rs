//! Transport configuration.
//!
//! Loaded from TOML, durations in milliseconds:
//!
//! ```toml
//! handshake_retry_interval_ms = 50
//! handshake_timeout_ms = 10000   # omit to retry forever
//! request_timeout_ms = 30000     # omit for no per-request timeout
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default delay between handshake retransmissions.
pub const DEFAULT_HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Timing knobs of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay between `handshake_request` retransmissions.
    pub handshake_retry_interval_ms: u64,
    /// Give up on the handshake after this long. `None` retries until
    /// answered or disposed.
    pub handshake_timeout_ms: Option<u64>,
    /// Settle a request with a timeout error after this long. `None` waits
    /// for the response, the caller's cancellation token, or disposal.
    pub request_timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_retry_interval_ms: DEFAULT_HANDSHAKE_RETRY_INTERVAL.as_millis() as u64,
            handshake_timeout_ms: None,
            request_timeout_ms: None,
        }
    }
}

impl TransportConfig {
    /// Parse from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the handshake retry interval.
    pub fn with_handshake_retry_interval(mut self, interval: Duration) -> Self {
        self.handshake_retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the overall handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Retry interval, never zero.
    pub fn handshake_retry_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.handshake_retry_interval(), Duration::from_millis(50));
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn parse_partial_toml() {
        let config = TransportConfig::from_toml_str("handshake_timeout_ms = 2000").unwrap();
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.handshake_retry_interval_ms, 50);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = TransportConfig::default().with_handshake_retry_interval(Duration::ZERO);
        assert_eq!(config.handshake_retry_interval(), Duration::from_millis(1));
    }

    #[test]
    fn rejects_bad_types() {
        assert!(TransportConfig::from_toml_str("request_timeout_ms = \"soon\"").is_err());
    }
}
