//! Session configuration.
//!
//! Every field has a default, so a partial TOML or JSON table is enough.
//! Durations are written as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use fileflow_signaling::{ANSWER_TIMEOUT, CONNECT_TIMEOUT, GATHER_TIMEOUT, SignalingConfig};

/// Default time a live transfer may go without progress.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Default watchdog check period.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Default cap on one inbound file: 4 GiB.
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on candidate gathering.
    #[serde(default = "default_gather_timeout", with = "duration_ms")]
    pub gather_timeout: Duration,

    /// Bound on dialing the peer and on capability exchange.
    #[serde(default = "default_connect_timeout", with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Bound on the answering side waiting to be admitted.
    #[serde(default = "default_answer_timeout", with = "duration_ms")]
    pub answer_timeout: Duration,

    #[serde(default = "default_watchdog_timeout", with = "duration_ms")]
    pub watchdog_timeout: Duration,

    #[serde(default = "default_watchdog_interval", with = "duration_ms")]
    pub watchdog_interval: Duration,

    /// Advertise 127.0.0.1; both peers on one machine need this.
    #[serde(default)]
    pub include_loopback: bool,

    /// Listening port of the offering side (0 = auto-assign).
    #[serde(default)]
    pub listen_port: u16,

    /// Inbound files larger than this are refused.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Events a slow observer may fall behind before it starts missing some.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Name shown to the peer (hostname by default).
    #[serde(default = "default_device_name")]
    pub device_name: Option<String>,
}

fn default_gather_timeout() -> Duration {
    GATHER_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    CONNECT_TIMEOUT
}

fn default_answer_timeout() -> Duration {
    ANSWER_TIMEOUT
}

fn default_watchdog_timeout() -> Duration {
    WATCHDOG_TIMEOUT
}

fn default_watchdog_interval() -> Duration {
    WATCHDOG_INTERVAL
}

fn default_max_file_size() -> u64 {
    MAX_FILE_SIZE
}

fn default_event_buffer() -> usize {
    256
}

fn default_device_name() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gather_timeout: default_gather_timeout(),
            connect_timeout: default_connect_timeout(),
            answer_timeout: default_answer_timeout(),
            watchdog_timeout: default_watchdog_timeout(),
            watchdog_interval: default_watchdog_interval(),
            include_loopback: false,
            listen_port: 0,
            max_file_size: default_max_file_size(),
            event_buffer: default_event_buffer(),
            device_name: default_device_name(),
        }
    }
}

impl SessionConfig {
    /// The signaling part of this configuration.
    pub fn signaling(&self) -> SignalingConfig {
        SignalingConfig {
            gather_timeout: self.gather_timeout,
            connect_timeout: self.connect_timeout,
            answer_timeout: self.answer_timeout,
            include_loopback: self.include_loopback,
            listen_port: self.listen_port,
            device_name: self.device_name.clone(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
