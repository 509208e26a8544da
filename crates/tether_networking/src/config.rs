//! # Node Configuration
//!
//! One TOML file per node. Every field has a default, so an empty file is a
//! valid console configuration that dials nobody.
//!
//! ```toml
//! instance_name = "rov"
//! tick_rate = 60
//! listen_addr = "0.0.0.0:44445"
//! heartbeat_interval_ms = 500
//! dead_peer_timeout_ms = 3000
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::replication::ReplicationConfig;
use crate::transport::TransportConfig;
use crate::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_TICK_RATE, MIN_FRAME_BYTES};

/// Settings for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name used in logs and for the node's `Name` component.
    pub instance_name: String,
    /// Control-loop frequency in Hz.
    pub tick_rate: u32,
    /// Accept connections here (robot).
    pub listen_addr: Option<SocketAddr>,
    /// Dial these (console).
    pub peers: Vec<SocketAddr>,
    /// Idle time before a heartbeat is sent.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is dropped.
    pub dead_peer_timeout_ms: u64,
    /// First reconnect delay.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap.
    pub reconnect_max_ms: u64,
    /// Largest frame body produced or accepted.
    pub max_frame_bytes: usize,
    /// Outbound frames queued per peer before the oldest is dropped.
    pub outbound_queue_frames: usize,
    /// Inbound events buffered between reactor and tick thread.
    pub inbound_queue_frames: usize,
    /// Ticks between outbound flushes.
    pub flush_interval_ticks: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            instance_name: "tether".to_owned(),
            tick_rate: DEFAULT_TICK_RATE,
            listen_addr: None,
            peers: Vec::new(),
            heartbeat_interval_ms: 500,
            dead_peer_timeout_ms: 3_000,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue_frames: 256,
            inbound_queue_frames: 1024,
            flush_interval_ticks: 1,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`], [`ConfigError::Parse`] or
    /// [`ConfigError::Invalid`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.tick_rate == 0 {
            return invalid("tick_rate must be at least 1".to_owned());
        }
        if self.flush_interval_ticks == 0 {
            return invalid("flush_interval_ticks must be at least 1".to_owned());
        }
        if self.outbound_queue_frames == 0 || self.inbound_queue_frames == 0 {
            return invalid("queue capacities must be at least 1".to_owned());
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return invalid(format!(
                "max_frame_bytes must be at least {MIN_FRAME_BYTES}, got {}",
                self.max_frame_bytes
            ));
        }
        if u32::try_from(self.max_frame_bytes).is_err() {
            return invalid("max_frame_bytes must fit in 32 bits".to_owned());
        }
        if self.heartbeat_interval_ms == 0 {
            return invalid("heartbeat_interval_ms must be at least 1".to_owned());
        }
        if self.heartbeat_interval_ms >= self.dead_peer_timeout_ms {
            return invalid(format!(
                "heartbeat_interval_ms ({}) must be below dead_peer_timeout_ms ({})",
                self.heartbeat_interval_ms, self.dead_peer_timeout_ms
            ));
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_initial_ms > self.reconnect_max_ms {
            return invalid(
                "reconnect_initial_ms must be at least 1 and at most reconnect_max_ms".to_owned(),
            );
        }
        Ok(())
    }

    /// Duration of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Transport settings derived from this config.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            listen_addr: self.listen_addr,
            peers: self.peers.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            dead_peer_timeout: Duration::from_millis(self.dead_peer_timeout_ms),
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
            max_frame_bytes: self.max_frame_bytes,
            outbound_queue_frames: self.outbound_queue_frames,
            inbound_queue_frames: self.inbound_queue_frames,
        }
    }

    /// Replication settings derived from this config.
    #[must_use]
    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            max_frame_bytes: self.max_frame_bytes,
            flush_interval_ticks: self.flush_interval_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.tick_duration(), Duration::from_secs(1) / 60);
    }

    #[test]
    fn test_parse_robot_config() {
        let config = SyncConfig::from_toml_str(
            r#"
            instance_name = "rov"
            tick_rate = 100
            listen_addr = "0.0.0.0:44445"
            heartbeat_interval_ms = 200
            dead_peer_timeout_ms = 1000
            flush_interval_ticks = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.instance_name, "rov");
        assert_eq!(config.listen_addr, Some("0.0.0.0:44445".parse().unwrap()));
        let transport = config.transport_config();
        assert_eq!(transport.dead_peer_timeout, Duration::from_secs(1));
        assert_eq!(config.replication_config().flush_interval_ticks, 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            "tick_rate = 0",
            "max_frame_bytes = 8",
            "outbound_queue_frames = 0",
            "heartbeat_interval_ms = 5000\ndead_peer_timeout_ms = 1000",
            "reconnect_initial_ms = 9000\nreconnect_max_ms = 100",
        ];
        for case in cases {
            assert!(
                matches!(SyncConfig::from_toml_str(case), Err(ConfigError::Invalid(_))),
                "{case}"
            );
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            SyncConfig::from_toml_str("tick_rate = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SyncConfig::load("/nonexistent/tether.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
