//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section has `#[serde(default)]`
//! so a settings file only needs the values it changes.

mod adapters;
mod server;

pub use adapters::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the broker.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "dispatch": { "maxConcurrentCalls": 8 },
///   "adapters": { "camera": { "enabled": false } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    pub server: ServerSettings,
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
    pub adapters: AdapterSettings,
}

impl BrokerSettings {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must be > 0".into()));
        }
        if self.dispatch.max_concurrent_calls == 0 {
            return Err(SettingsError::InvalidValue(
                "dispatch.maxConcurrentCalls must be > 0".into(),
            ));
        }
        if self.dispatch.call_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "dispatch.callTimeoutMs must be > 0".into(),
            ));
        }
        if self.dispatch.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "dispatch.outboundBuffer must be > 0".into(),
            ));
        }
        let fps = self.adapters.camera.fps;
        if !(1..=60).contains(&fps) {
            return Err(SettingsError::InvalidValue(format!(
                "adapters.camera.fps must be 1..=60, got {fps}"
            )));
        }
        let camera = &self.adapters.camera;
        for (field, value) in [("width", camera.width), ("height", camera.height)] {
            if !(1..=MAX_CAMERA_DIMENSION).contains(&value) {
                return Err(SettingsError::InvalidValue(format!(
                    "adapters.camera.{field} must be 1..={MAX_CAMERA_DIMENSION}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = BrokerSettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.dispatch.max_concurrent_calls, 4);
        assert_eq!(s.dispatch.queue_bound, 16);
        assert_eq!(s.dispatch.call_timeout_ms, 30_000);
        assert_eq!(s.logging.level, "info");
        assert!(s.adapters.camera.enabled);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: BrokerSettings =
            serde_json::from_str(r#"{"dispatch": {"maxConcurrentCalls": 2}}"#).unwrap();
        assert_eq!(s.dispatch.max_concurrent_calls, 2);
        assert_eq!(s.dispatch.queue_bound, 16);
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(BrokerSettings::default()).unwrap();
        assert!(json["dispatch"]["callTimeoutMs"].is_u64());
        assert!(json["server"]["heartbeatIntervalMs"].is_u64());
        assert!(json["adapters"]["weather"]["baseUrl"].is_string());
    }

    #[test]
    fn zero_cap_rejected() {
        let mut s = BrokerSettings::default();
        s.dispatch.max_concurrent_calls = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn camera_fps_range_checked() {
        let mut s = BrokerSettings::default();
        s.adapters.camera.fps = 120;
        assert!(s.validate().is_err());
    }

    #[test]
    fn camera_dimensions_range_checked() {
        let mut s = BrokerSettings::default();
        s.adapters.camera.width = 100_000;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("width")));

        let mut s = BrokerSettings::default();
        s.adapters.camera.height = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("height")));

        let mut s = BrokerSettings::default();
        s.adapters.camera.width = MAX_CAMERA_DIMENSION;
        s.adapters.camera.height = MAX_CAMERA_DIMENSION;
        assert!(s.validate().is_ok());
    }
}
