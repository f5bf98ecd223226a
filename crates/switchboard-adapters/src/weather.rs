//! Live weather lookup against the AMap (Gaode) weather API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use switchboard_core::errors::AdapterError;
use switchboard_core::tools::{CallAdapter, InvocationContext, OutputKind, ToolDescriptor};
use switchboard_settings::HttpAdapterSettings;

use crate::http::{build_client, check_status, classify, endpoint};

const WEATHER_PATH: &str = "/v3/weather/weatherInfo";

pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl WeatherTool {
    pub fn new(settings: &HttpAdapterSettings) -> Self {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Self {
            client: build_client(timeout),
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    status: String,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    lives: Vec<LiveWeather>,
}

/// One live observation, as reported by the API.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveWeather {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub winddirection: Option<String>,
    #[serde(default)]
    pub windpower: Option<String>,
    #[serde(default)]
    pub humidity: Option<String>,
    #[serde(default)]
    pub reporttime: Option<String>,
}

fn or_unknown(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("Unknown")
}

/// Human-readable summary of an observation.
pub fn format_weather(w: &LiveWeather) -> String {
    format!(
        "{}\nTemperature: {}°C\nHumidity: {}%\nWind: {} force {}\nWeather: {}\nReported: {}\n",
        or_unknown(&w.city),
        or_unknown(&w.temperature),
        or_unknown(&w.humidity),
        or_unknown(&w.winddirection),
        or_unknown(&w.windpower),
        or_unknown(&w.weather),
        or_unknown(&w.reporttime),
    )
}

#[async_trait]
impl CallAdapter for WeatherTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "query_weather",
            "Look up today's live weather for an AMap city code (e.g. 110000 for Beijing).",
            serde_json::json!({
                "type": "object",
                "required": ["city_code"],
                "properties": {
                    "city_code": {
                        "type": "string",
                        "minLength": 1,
                        "description": "AMap (Gaode) administrative city code"
                    }
                },
                "additionalProperties": false
            }),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let city_code = args["city_code"]
            .as_str()
            .ok_or_else(|| AdapterError::MalformedInput("city_code is required".into()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured("GAODE_API_KEY not set".into()))?;

        debug!(invocation_id = %ctx.invocation_id, city_code, "querying weather");
        let response = self
            .client
            .get(endpoint(&self.base_url, WEATHER_PATH))
            .query(&[
                ("key", api_key),
                ("city", city_code),
                ("extensions", "base"),
                ("output", "json"),
            ])
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        let body: WeatherResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        if body.status != "1" {
            return Err(AdapterError::Rejected(format!(
                "API error: {}",
                body.info.as_deref().unwrap_or("Unknown error")
            )));
        }
        let Some(live) = body.lives.into_iter().next() else {
            return Err(AdapterError::Rejected(format!(
                "no weather data found for city {city_code}"
            )));
        };

        let summary = format_weather(&live);
        let mut value = serde_json::to_value(&live)
            .map_err(|e| AdapterError::Rejected(format!("unencodable weather record: {e}")))?;
        value["summary"] = serde_json::Value::String(summary);
        Ok(value)
    }
}
