//! Built-in tool adapters: weather, web search, Bilibili, camera and help.

pub mod bilibili;
pub mod camera;
pub mod help;
mod http;
pub mod search;
pub mod weather;

use std::sync::Arc;

use tracing::info;

use switchboard_core::tools::Adapter;
use switchboard_engine::error::RegistryError;
use switchboard_engine::ToolRegistry;
use switchboard_settings::AdapterSettings;

pub use bilibili::bilibili_tools;
pub use camera::{CameraStreamTool, CaptureDevice, CaptureImageTool, SyntheticCamera};
pub use help::HelpTool;
pub use search::WebSearchTool;
pub use weather::WeatherTool;

/// Register every enabled built-in tool. `help` is always registered.
/// Returns the registered tool names in registration order.
pub fn register_defaults(
    registry: &Arc<ToolRegistry>,
    settings: &AdapterSettings,
) -> Result<Vec<String>, RegistryError> {
    let mut adapters = Vec::new();
    if settings.weather.enabled {
        adapters.push(Adapter::Call(Arc::new(WeatherTool::new(&settings.weather))));
    }
    if settings.search.enabled {
        adapters.push(Adapter::Call(Arc::new(WebSearchTool::new(&settings.search))));
    }
    if settings.bilibili.enabled {
        adapters.extend(bilibili_tools(&settings.bilibili).into_iter().map(Adapter::Call));
    }
    if settings.camera.enabled {
        let device: Arc<dyn CaptureDevice> =
            Arc::new(SyntheticCamera::from_settings(&settings.camera));
        adapters.push(Adapter::Stream(Arc::new(CameraStreamTool::new(
            Arc::clone(&device),
            settings.camera.fps,
        ))));
        adapters.push(Adapter::Call(Arc::new(CaptureImageTool::new(device))));
    }
    adapters.push(Adapter::Call(Arc::new(HelpTool::new(registry))));

    let mut names = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        names.push(registry.register(adapter)?.name);
    }
    info!(tools = ?names, "registered built-in tools");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::tools::OutputKind;

    #[test]
    fn registers_all_by_default() {
        let registry = Arc::new(ToolRegistry::new());
        let names = register_defaults(&registry, &AdapterSettings::default()).unwrap();
        assert_eq!(
            names,
            vec![
                "query_weather",
                "web_search",
                "bilibili_search",
                "bilibili_video_info",
                "bilibili_video_comments",
                "bilibili_ranking",
                "camera_stream",
                "capture_image",
                "help"
            ]
        );
        assert_eq!(
            registry.lookup("camera_stream").unwrap().output_kind,
            OutputKind::Stream
        );
    }

    #[test]
    fn disabled_adapters_are_skipped() {
        let mut settings = AdapterSettings::default();
        settings.weather.enabled = false;
        settings.camera.enabled = false;
        settings.bilibili.enabled = false;
        let registry = Arc::new(ToolRegistry::new());
        let names = register_defaults(&registry, &settings).unwrap();
        assert_eq!(names, vec!["web_search", "help"]);
    }

    #[test]
    fn registering_twice_is_rejected() {
        let registry = Arc::new(ToolRegistry::new());
        register_defaults(&registry, &AdapterSettings::default()).unwrap();
        let err = register_defaults(&registry, &AdapterSettings::default()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(_)));
        assert_eq!(registry.count(), 9);
    }

    #[test]
    fn builtin_schemas_validate_examples() {
        let registry = Arc::new(ToolRegistry::new());
        register_defaults(&registry, &AdapterSettings::default()).unwrap();
        assert!(registry
            .validate("query_weather", &serde_json::json!({"city_code": "110000"}))
            .is_ok());
        assert!(registry
            .validate("query_weather", &serde_json::json!({"city": "Beijing"}))
            .is_err());
        assert!(registry
            .validate("web_search", &serde_json::json!({"query": "x", "count": 50}))
            .is_err());
        assert!(registry
            .validate("camera_stream", &serde_json::json!({"fps": 30}))
            .is_ok());
        assert!(registry
            .validate("bilibili_video_info", &serde_json::json!({"bvid": "BV1xx411c7mD"}))
            .is_ok());
        assert!(registry
            .validate("bilibili_video_info", &serde_json::json!({"bvid": "av170001"}))
            .is_err());
        assert!(registry
            .validate("bilibili_ranking", &serde_json::json!({"day": 5}))
            .is_err());
    }
}
