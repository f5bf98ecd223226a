//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BrokerSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SWITCHBOARD_*` environment overrides (highest priority)
//! 4. Fill API keys from the providers' conventional env vars if still unset

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::BrokerSettings;

/// Resolve the default settings path (`~/.switchboard/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".switchboard")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BrokerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BrokerSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`] with an injectable env lookup.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<BrokerSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(BrokerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BrokerSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, &env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BrokerSettings) {
    apply_overrides(settings, &|name: &str| std::env::var(name).ok());
}

/// Apply overrides from an env lookup.
///
/// Integers must parse and be within range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_overrides<F>(settings: &mut BrokerSettings, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let reader = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = reader.string("SWITCHBOARD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = reader.u16("SWITCHBOARD_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_CLIENT_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.server.client_timeout_ms = v;
    }

    // ── Dispatch ────────────────────────────────────────────────────
    if let Some(v) = reader.usize("SWITCHBOARD_MAX_CONCURRENT_CALLS", 1, 1_024) {
        settings.dispatch.max_concurrent_calls = v;
    }
    if let Some(v) = reader.usize("SWITCHBOARD_QUEUE_BOUND", 0, 100_000) {
        settings.dispatch.queue_bound = v;
    }
    if let Some(v) = reader.u64("SWITCHBOARD_CALL_TIMEOUT_MS", 100, 3_600_000) {
        settings.dispatch.call_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("SWITCHBOARD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = reader.bool("SWITCHBOARD_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Adapters ────────────────────────────────────────────────────
    if let Some(v) = reader.bool("SWITCHBOARD_WEATHER_ENABLED") {
        settings.adapters.weather.enabled = v;
    }
    if let Some(v) = reader.bool("SWITCHBOARD_SEARCH_ENABLED") {
        settings.adapters.search.enabled = v;
    }
    if let Some(v) = reader.bool("SWITCHBOARD_BILIBILI_ENABLED") {
        settings.adapters.bilibili.enabled = v;
    }
    if let Some(v) = reader.bool("SWITCHBOARD_CAMERA_ENABLED") {
        settings.adapters.camera.enabled = v;
    }
    if let Some(v) = reader.u32("SWITCHBOARD_CAMERA_FPS", 1, 60) {
        settings.adapters.camera.fps = v;
    }
    if settings.adapters.weather.api_key.is_none() {
        settings.adapters.weather.api_key = reader.string("GAODE_API_KEY");
    }
    if settings.adapters.search.api_key.is_none() {
        settings.adapters.search.api_key = reader.string("BRAVE_SEARCH_API_KEY");
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an integer within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<'a, F> {
    env: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = (self.env)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.ranged(name, min, max)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.ranged(name, min, max)
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.ranged(name, min, max)
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.ranged(name, min, max)
    }
}
