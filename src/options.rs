//! Socket and monitor configuration.
//!
//! All option structs deserialize from partial JSON documents; missing fields
//! take their defaults. Durations are expressed in milliseconds on the wire.
//!
//! # Example
//!
//! ```
//! use streamwire::{SocketMode, TransportConfig};
//!
//! let config = TransportConfig::from_json(
//!     r#"{ "socket": { "mode": "raw" }, "monitor": { "kind": "default", "ping_interval_ms": 250 } }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.socket.mode, SocketMode::Raw);
//! assert_eq!(config.socket.buffer_size, 65_536);
//! assert_eq!(config.monitor.ping_interval().as_millis(), 250);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::protocol::HEADER_SIZE;

/// Default receive buffer capacity (64 KB).
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;

/// Default hard upper bound on a single frame's declared length (1 MB).
pub const DEFAULT_EXTREME_MESSAGE_SIZE: usize = 1_048_576;

/// Default heartbeat interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for observing a heartbeat.
pub const DEFAULT_MAX_PING_DELAY: Duration = Duration::from_secs(5);

/// How the engine treats the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Chunks are delivered as read, no boundaries.
    Raw,
    /// Length-prefixed frames, one callback per send.
    #[default]
    Messaging,
}

/// Options fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// Initial receive buffer capacity in bytes.
    pub buffer_size: usize,
    /// Largest payload a frame may declare (messaging mode).
    pub extreme_message_size: usize,
    /// Raw or messaging mode.
    pub mode: SocketMode,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            extreme_message_size: DEFAULT_EXTREME_MESSAGE_SIZE,
            mode: SocketMode::Messaging,
        }
    }
}

impl SocketOptions {
    /// Messaging-mode options with defaults.
    pub fn messaging() -> Self {
        Self::default()
    }

    /// Raw-mode options with defaults.
    pub fn raw() -> Self {
        Self {
            mode: SocketMode::Raw,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_extreme_message_size(mut self, size: usize) -> Self {
        self.extreme_message_size = size;
        self
    }

    pub fn with_mode(mut self, mode: SocketMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the options for values no engine can run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(WireError::Config("buffer_size must be > 0".to_string()));
        }
        if self.mode == SocketMode::Messaging && self.buffer_size < HEADER_SIZE {
            return Err(WireError::Config(format!(
                "buffer_size must hold at least a {HEADER_SIZE}-byte header"
            )));
        }
        if self.extreme_message_size > i32::MAX as usize {
            return Err(WireError::Config(format!(
                "extreme_message_size {} exceeds the i32 length prefix",
                self.extreme_message_size
            )));
        }
        Ok(())
    }
}

/// Which connection monitor to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    /// No liveness checks.
    #[default]
    None,
    /// Periodic heartbeat with a deadline.
    Default,
}

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionMonitorOptions {
    pub kind: MonitorKind,
    /// Interval between heartbeats, in milliseconds.
    pub ping_interval_ms: u64,
    /// Maximum silence before the connection is declared lost, in milliseconds.
    pub max_ping_delay_ms: u64,
}

impl Default for ConnectionMonitorOptions {
    fn default() -> Self {
        Self {
            kind: MonitorKind::None,
            ping_interval_ms: DEFAULT_PING_INTERVAL.as_millis() as u64,
            max_ping_delay_ms: DEFAULT_MAX_PING_DELAY.as_millis() as u64,
        }
    }
}

impl ConnectionMonitorOptions {
    /// Heartbeat monitoring with the given timing.
    pub fn heartbeat(ping_interval: Duration, max_ping_delay: Duration) -> Self {
        Self {
            kind: MonitorKind::Default,
            ping_interval_ms: ping_interval.as_millis() as u64,
            max_ping_delay_ms: max_ping_delay.as_millis() as u64,
        }
    }

    #[inline]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[inline]
    pub fn max_ping_delay(&self) -> Duration {
        Duration::from_millis(self.max_ping_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == MonitorKind::None {
            return Ok(());
        }
        if self.ping_interval_ms == 0 {
            return Err(WireError::Config("ping_interval_ms must be > 0".to_string()));
        }
        if self.max_ping_delay_ms < self.ping_interval_ms {
            return Err(WireError::Config(format!(
                "max_ping_delay_ms ({}) is shorter than ping_interval_ms ({})",
                self.max_ping_delay_ms, self.ping_interval_ms
            )));
        }
        Ok(())
    }
}

/// Everything needed to run one managed connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub socket: SocketOptions,
    pub monitor: ConnectionMonitorOptions,
}

impl TransportConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.socket.validate()?;
        self.monitor.validate()
    }
}
