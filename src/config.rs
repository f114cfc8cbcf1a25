//! Session configuration.
//!
//! # Example
//!
//! ```
//! use muxwire::Config;
//!
//! let config = Config::from_json_str(r#"{ "accept_backlog": 16 }"#).unwrap();
//! assert_eq!(config.accept_backlog, 16);
//! assert_eq!(config.max_stream_window_size, 256 * 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::protocol::{DEFAULT_ACCEPT_BACKLOG, DEFAULT_MAX_FRAME_PAYLOAD, DEFAULT_STREAM_WINDOW};

/// Default keepalive interval (30 seconds).
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hard cap on concurrently live streams.
    pub accept_backlog: usize,
    /// Initial send window of every stream, and the auto-grant target.
    pub max_stream_window_size: u32,
    /// Largest Data payload accepted from the peer.
    pub max_frame_payload: u32,
    /// Send periodic pings.
    pub enable_keepalive: bool,
    /// Interval between keepalive pings, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Grant the peer fresh credit automatically as received data is consumed.
    pub auto_window_update: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            max_stream_window_size: DEFAULT_STREAM_WINDOW,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            enable_keepalive: false,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            auto_window_update: false,
        }
    }
}

impl Config {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Keepalive interval as a `Duration`.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.accept_backlog == 0 {
            return Err(MuxError::InvalidArgument(
                "accept_backlog must be at least 1".to_string(),
            ));
        }
        if self.max_stream_window_size == 0 {
            return Err(MuxError::InvalidArgument(
                "max_stream_window_size must be nonzero".to_string(),
            ));
        }
        if self.max_frame_payload == 0 {
            return Err(MuxError::InvalidArgument(
                "max_frame_payload must be nonzero".to_string(),
            ));
        }
        if self.enable_keepalive && self.keepalive_interval_ms == 0 {
            return Err(MuxError::InvalidArgument(
                "keepalive_interval_ms must be nonzero when keepalive is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
