//! Tool adapter settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterSettings {
    pub weather: HttpAdapterSettings,
    pub search: HttpAdapterSettings,
    pub bilibili: HttpAdapterSettings,
    pub camera: CameraSettings,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            weather: HttpAdapterSettings {
                base_url: "https://restapi.amap.com".to_string(),
                ..HttpAdapterSettings::default()
            },
            search: HttpAdapterSettings {
                base_url: "https://api.search.brave.com".to_string(),
                ..HttpAdapterSettings::default()
            },
            bilibili: HttpAdapterSettings {
                base_url: "https://api.bilibili.com".to_string(),
                ..HttpAdapterSettings::default()
            },
            camera: CameraSettings::default(),
        }
    }
}

/// Settings shared by the HTTP-backed tools.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpAdapterSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Falls back to the provider's conventional env var when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request HTTP timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpAdapterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

/// Largest accepted camera width or height, in pixels.
pub const MAX_CAMERA_DIMENSION: u32 = 4096;

/// Capture device settings for the camera stream tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub enabled: bool,
    /// Default frame rate when the caller does not ask for one.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 10,
            width: 64,
            height: 48,
        }
    }
}
