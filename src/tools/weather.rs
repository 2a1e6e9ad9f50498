//! Weather tool backed by OpenWeatherMap
//!
//! Without an API key, or when the upstream call fails, the tool answers with
//! deterministic mock data so clients always get a well-formed report.

use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityMetadata};
use crate::mcp::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";
pub const BASE_URL_ENV: &str = "OPENWEATHER_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

const MAX_DAYS: u32 = 7;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

fn default_days() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct WeatherInput {
    location: String,
    #[serde(default)]
    units: Units,
    #[serde(default = "default_days")]
    days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherCondition {
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherTemperature {
    pub current: f64,
    pub feels_like: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherDay {
    pub date: String,
    pub temperature: WeatherTemperature,
    pub conditions: Vec<WeatherCondition>,
    pub humidity: i64,
    pub wind_speed: f64,
    pub wind_direction: i64,
    pub pressure: i64,
    pub sunrise: String,
    pub sunset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub location: String,
    pub country: String,
    pub units: Units,
    pub current: WeatherDay,
    pub forecast: Option<Vec<WeatherDay>>,
    /// True when the report did not come from the upstream API
    pub mock: bool,
}

/// Weather lookup tool
#[derive(Debug, Clone)]
pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl WeatherTool {
    pub fn new<S: Into<String>>(base_url: S, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Read the API key and optional base URL override from the environment
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new);
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key)
    }

    async fn fetch(&self, api_key: &str, input: &WeatherInput, timeout: Duration) -> Result<WeatherReport, reqwest::Error> {
        let current: Value = self
            .client
            .get(format!("{}/weather", self.base_url))
            .query(&[("q", input.location.as_str()), ("units", input.units.as_str()), ("appid", api_key)])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let forecast = if input.days > 1 {
            let count = (input.days * 8).min(40).to_string();
            let data: Value = self
                .client
                .get(format!("{}/forecast", self.base_url))
                .query(&[
                    ("q", input.location.as_str()),
                    ("units", input.units.as_str()),
                    ("cnt", count.as_str()),
                    ("appid", api_key),
                ])
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Some(parse_forecast(&data, input.days as usize))
        } else {
            None
        };

        Ok(WeatherReport {
            location: str_at(&current, "/name").unwrap_or(&input.location).to_string(),
            country: str_at(&current, "/sys/country").unwrap_or_default().to_string(),
            units: input.units,
            current: parse_current(&current),
            forecast,
            mock: false,
        })
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::from_env()
    }
}

fn str_at<'a>(data: &'a Value, pointer: &str) -> Option<&'a str> {
    data.pointer(pointer).and_then(Value::as_str)
}

fn f64_at(data: &Value, pointer: &str) -> f64 {
    data.pointer(pointer).and_then(Value::as_f64).unwrap_or_default()
}

fn local_time(timestamp: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(timestamp, 0).single()
}

fn clock(data: &Value, pointer: &str) -> String {
    data.pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(local_time)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn conditions(data: &Value) -> Vec<WeatherCondition> {
    data.get("weather")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(condition).collect())
        .unwrap_or_default()
}

fn condition(item: &Value) -> WeatherCondition {
    WeatherCondition {
        main: str_at(item, "/main").unwrap_or_default().to_string(),
        description: str_at(item, "/description").unwrap_or_default().to_string(),
        icon: str_at(item, "/icon").unwrap_or_default().to_string(),
    }
}

fn parse_current(data: &Value) -> WeatherDay {
    WeatherDay {
        date: Local::now().format("%Y-%m-%d").to_string(),
        temperature: WeatherTemperature {
            current: f64_at(data, "/main/temp"),
            feels_like: f64_at(data, "/main/feels_like"),
            min: f64_at(data, "/main/temp_min"),
            max: f64_at(data, "/main/temp_max"),
        },
        conditions: conditions(data),
        humidity: f64_at(data, "/main/humidity") as i64,
        wind_speed: f64_at(data, "/wind/speed"),
        wind_direction: f64_at(data, "/wind/deg") as i64,
        pressure: f64_at(data, "/main/pressure") as i64,
        sunrise: clock(data, "/sys/sunrise"),
        sunset: clock(data, "/sys/sunset"),
    }
}

/// Fold three-hourly forecast entries into per-day summaries
fn parse_forecast(data: &Value, days: usize) -> Vec<WeatherDay> {
    let mut by_day: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for entry in data.get("list").and_then(Value::as_array).into_iter().flatten() {
        let Some(date) = entry.get("dt").and_then(Value::as_i64).and_then(local_time) else {
            continue;
        };
        by_day.entry(date.format("%Y-%m-%d").to_string()).or_default().push(entry);
    }

    by_day
        .into_iter()
        .take(days)
        .map(|(date, entries)| {
            let n = entries.len() as f64;
            let avg = |pointer: &str| entries.iter().map(|e| f64_at(e, pointer)).sum::<f64>() / n;

            // Most frequent conditions first, ties broken by first appearance
            let mut counts: Vec<(WeatherCondition, usize)> = Vec::new();
            for entry in &entries {
                if let Some(first) = entry.pointer("/weather/0") {
                    let c = condition(first);
                    match counts.iter_mut().find(|(seen, _)| *seen == c) {
                        Some((_, count)) => *count += 1,
                        None => counts.push((c, 1)),
                    }
                }
            }
            counts.sort_by(|a, b| b.1.cmp(&a.1));

            WeatherDay {
                date,
                temperature: WeatherTemperature {
                    current: f64_at(entries[0], "/main/temp"),
                    feels_like: f64_at(entries[0], "/main/feels_like"),
                    min: entries.iter().map(|e| f64_at(e, "/main/temp_min")).fold(f64::INFINITY, f64::min),
                    max: entries.iter().map(|e| f64_at(e, "/main/temp_max")).fold(f64::NEG_INFINITY, f64::max),
                },
                conditions: counts.into_iter().take(3).map(|(c, _)| c).collect(),
                humidity: avg("/main/humidity") as i64,
                wind_speed: avg("/wind/speed"),
                wind_direction: avg("/wind/deg") as i64,
                pressure: avg("/main/pressure") as i64,
                sunrise: "N/A".to_string(),
                sunset: "N/A".to_string(),
            }
        })
        .collect()
}

fn mock_condition(offset: i64) -> WeatherCondition {
    let (main, description, icon) = if offset % 2 == 0 {
        ("Clear", "clear sky", "01d")
    } else {
        ("Clouds", "scattered clouds", "03d")
    };
    WeatherCondition {
        main: main.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
    }
}

fn mock_day(offset: i64) -> WeatherDay {
    let shift = offset as f64;
    WeatherDay {
        date: (Local::now() + ChronoDuration::days(offset)).format("%Y-%m-%d").to_string(),
        temperature: WeatherTemperature {
            current: if offset == 0 { 22.5 } else { 22.0 + shift },
            feels_like: if offset == 0 { 23.0 } else { 22.5 + shift },
            min: 18.0 + shift,
            max: 25.0 + shift,
        },
        conditions: vec![mock_condition(offset)],
        humidity: 65 - offset,
        wind_speed: 5.2 + shift * 0.5,
        wind_direction: (180 + offset * 10) % 360,
        pressure: 1013 - offset,
        sunrise: format!("06:{:02}", 30 + offset),
        sunset: format!("20:{:02}", 15 - offset),
    }
}

/// Deterministic report; the forecast covers the days after today
fn mock_report(input: &WeatherInput) -> WeatherReport {
    let forecast = (input.days > 1).then(|| (1..input.days.min(MAX_DAYS) as i64).map(mock_day).collect());
    WeatherReport {
        location: input.location.clone(),
        country: "US".to_string(),
        units: input.units,
        current: mock_day(0),
        forecast,
        mock: true,
    }
}

#[async_trait]
impl Capability for WeatherTool {
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::new(
            CapabilityKind::Tool,
            "weather",
            "Gets weather information for a location",
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "minLength": 1, "description": "The location to get weather for (city name, zip code, etc.)"},
                    "units": {"type": "string", "enum": ["metric", "imperial", "standard"], "default": "metric"},
                    "days": {"type": "integer", "minimum": 1, "maximum": MAX_DAYS, "default": 1, "description": "Number of days to forecast"}
                },
                "required": ["location"]
            }),
        )
    }

    async fn invoke(&self, arguments: Value, ctx: &Context) -> Result<Value, CapabilityError> {
        let input: WeatherInput =
            serde_json::from_value(arguments).map_err(|e| CapabilityError::invalid_arguments(e.to_string()))?;

        let report = match &self.api_key {
            None => {
                debug!("{} not set, returning mock weather", API_KEY_ENV);
                mock_report(&input)
            }
            Some(key) => {
                let timeout = ctx.remaining().min(UPSTREAM_TIMEOUT);
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Err(CapabilityError::cancelled()),
                    fetched = self.fetch(key.expose_secret(), &input, timeout) => match fetched {
                        Ok(report) => report,
                        Err(e) => {
                            warn!("Error getting weather for '{}': {}", input.location, e);
                            mock_report(&input)
                        }
                    },
                }
            }
        };

        serde_json::to_value(report).map_err(|e| CapabilityError::execution(e.to_string()))
    }
}
