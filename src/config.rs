//! Configuration types for the drone uplink

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the drone uplink process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneConfig {
    /// WebSocket signaling endpoint (ws:// or wss://)
    pub signaling_url: String,

    /// Identity announced to the signaling server on the `match` channel
    pub drone_id: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// Local RTP ingestion address, fixed for the process lifetime
    pub ingest_addr: SocketAddr,

    /// Receive buffer for the ingestion socket, in bytes.
    ///
    /// Raised well above platform defaults so short RTP bursts are not
    /// dropped (default: 300 kB).
    pub ingest_recv_buffer: usize,

    /// Liveness frame interval in seconds (default: 20)
    pub heartbeat_secs: u64,

    /// Retry policy for peer session construction
    pub session_retry: RetryPolicy,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/".to_string(),
            drone_id: "drone".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            ingest_addr: SocketAddr::from(([127, 0, 0, 1], 5004)),
            ingest_recv_buffer: 300 * 1024,
            heartbeat_secs: 20,
            session_retry: RetryPolicy::default(),
        }
    }
}

impl DroneConfig {
    /// Heartbeat interval as a [`Duration`]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Validate the configuration, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!("signaling url '{}': {}", self.signaling_url, e))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported signaling scheme '{other}', expected ws or wss"
                )))
            }
        }
        if self.drone_id.is_empty() {
            return Err(Error::InvalidConfig("drone id must not be empty".to_string()));
        }
        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN server is required".to_string(),
            ));
        }
        if self.ingest_recv_buffer == 0 {
            return Err(Error::InvalidConfig(
                "ingest receive buffer must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_secs == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry policy for peer session construction.
///
/// Controls how often a failed construction attempt is retried before the
/// error is returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failed attempt (default: 3)
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds (default: 500)
    pub backoff_initial_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 5000)
    pub backoff_max_ms: u64,

    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry attempt (0-indexed).
    ///
    /// Exponential, clamped to `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(ms.min(self.backoff_max_ms as f64) as u64)
    }

    /// Check if another attempt is allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_default_config_is_valid() {
        assert_ok!(DroneConfig::default().validate());
    }

    #[test]
    fn test_validate_rejects_non_websocket_scheme() {
        let config = DroneConfig {
            signaling_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unparseable_url() {
        let config = DroneConfig {
            signaling_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_stun_server() {
        let config = DroneConfig {
            stun_servers: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_drone_id() {
        let config = DroneConfig {
            drone_id: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        // 500 * 2^10 would be far past the cap
        assert_eq!(policy.backoff(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_retry_bound() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
