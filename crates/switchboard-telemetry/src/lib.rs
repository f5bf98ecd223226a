use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "switchboard_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Config from a level name, falling back to INFO for unknown names.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: parse_level(level).unwrap_or(Level::INFO),
            json,
            ..Self::default()
        }
    }

    pub fn with_module_level(mut self, module: &str, level: Level) -> Self {
        self.module_levels.push((module.to_string(), level));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`).
pub fn parse_level(name: &str) -> Option<Level> {
    Level::from_str(name.trim()).ok()
}

/// Filter directive built from the config, used when RUST_LOG is unset.
pub fn filter_directive(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Initialize tracing. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
