use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::Duration;
use tracing::debug;

use crate::config::WeatherConfig;
use crate::geo::GeoPoint;
use crate::safety::{WeatherReport, WeatherSource};

/// OpenWeatherMap current-conditions client (metric units).
pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    weather: Vec<OwmCondition>,
    wind: OwmWind,
    main: OwmMain,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
}

impl OpenWeatherClient {
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build weather HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

/// Decodes an OpenWeatherMap body. `cod` arrives as a number on success and
/// as a string on errors.
pub fn parse_report(body: JsonValue) -> Result<WeatherReport> {
    let cod = match &body["cod"] {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    };
    if cod != Some(200) {
        bail!(
            "Weather API error (cod {:?}): {}",
            body["cod"],
            body["message"].as_str().unwrap_or("no message")
        );
    }

    let response: OwmResponse =
        serde_json::from_value(body).context("Unexpected weather payload")?;
    let condition = response
        .weather
        .into_iter()
        .next()
        .context("Weather payload has no conditions")?;

    Ok(WeatherReport {
        condition: condition.main,
        description: condition.description,
        wind_speed_mps: response.wind.speed,
        temp_c: response.main.temp,
    })
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current(&self, point: GeoPoint) -> Result<WeatherReport> {
        let lat = point.lat.to_string();
        let lon = point.lon.to_string();
        let body: JsonValue = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .context("Weather request failed")?
            .json()
            .await
            .context("Weather response was not JSON")?;
        debug!("Weather response: {}", body);
        parse_report(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_current_conditions() {
        let body = json!({
            "cod": 200,
            "weather": [{"main": "Clouds", "description": "scattered clouds"}],
            "wind": {"speed": 4.6, "deg": 200},
            "main": {"temp": 17.3, "humidity": 60}
        });
        let report = parse_report(body).unwrap();
        assert_eq!(report.condition, "Clouds");
        assert_eq!(report.wind_speed_mps, 4.6);
        assert_eq!(
            report.summary(),
            "Clouds (scattered clouds), 17.3°C, Wind: 4.6 m/s"
        );
    }

    #[test]
    fn api_error_is_a_collaborator_error() {
        let body = json!({"cod": "401", "message": "Invalid API key"});
        let err = parse_report(body).unwrap_err();
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[test]
    fn missing_fields_are_errors() {
        assert!(parse_report(json!({"cod": 200, "weather": []})).is_err());
        assert!(parse_report(json!({
            "cod": 200,
            "weather": [],
            "wind": {"speed": 1.0},
            "main": {"temp": 10.0}
        }))
        .is_err());
    }
}
