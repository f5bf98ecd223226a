//! Server, dispatch and logging settings.

use serde::{Deserialize, Serialize};

/// WebSocket server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket and health port.
    pub port: u16,
    /// Outbound messages buffered per connection before it is considered stuck.
    pub max_send_queue: usize,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Connection dropped after this long without any client traffic.
    pub client_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_send_queue: 1024,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
        }
    }
}

/// Per-session dispatch limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Calls running at once per session.
    pub max_concurrent_calls: usize,
    /// Calls waiting for a slot before new ones are rejected as overloaded.
    pub queue_bound: usize,
    /// Default call deadline in milliseconds.
    pub call_timeout_ms: u64,
    /// How long unacknowledged terminal records are kept, in milliseconds.
    pub record_grace_ms: u64,
    /// Per-session event buffer.
    pub outbound_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            queue_bound: 16,
            call_timeout_ms: 30_000,
            record_grace_ms: 60_000,
            outbound_buffer: 256,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    /// JSON lines when true, compact text otherwise.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}
