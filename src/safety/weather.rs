use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

use super::SafetyVerdict;

/// Primary conditions that ground the vehicle regardless of wind.
pub const UNSAFE_CONDITIONS: [&str; 6] =
    ["Rain", "Thunderstorm", "Drizzle", "Snow", "Tornado", "Squall"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Primary condition group, e.g. `Clear`, `Clouds`, `Rain`.
    pub condition: String,
    pub description: String,
    pub wind_speed_mps: f64,
    pub temp_c: f64,
}

impl WeatherReport {
    pub fn summary(&self) -> String {
        format!(
            "{} ({}), {}°C, Wind: {} m/s",
            self.condition, self.description, self.temp_c, self.wind_speed_mps
        )
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, point: GeoPoint) -> Result<WeatherReport>;
}

pub struct WeatherStage {
    source: Arc<dyn WeatherSource>,
    max_wind_mps: f64,
}

impl WeatherStage {
    pub fn new(source: Arc<dyn WeatherSource>, max_wind_mps: f64) -> Self {
        Self {
            source,
            max_wind_mps,
        }
    }

    /// Fails open when the weather service cannot be reached or parsed.
    pub async fn evaluate(&self, point: GeoPoint) -> SafetyVerdict {
        match self.source.current(point).await {
            Ok(report) => self.judge(&report),
            Err(e) => SafetyVerdict::pass_with_warning(format!(
                "⚠️ Weather Check Failed (Offline?). Proceeding with caution. ({:#})",
                e
            )),
        }
    }

    pub fn judge(&self, report: &WeatherReport) -> SafetyVerdict {
        let summary = report.summary();

        if UNSAFE_CONDITIONS.contains(&report.condition.as_str()) {
            return SafetyVerdict::fail(format!(
                "⛔ Unsafe Condition: {} detected. ({})",
                report.condition, summary
            ));
        }

        if report.wind_speed_mps > self.max_wind_mps {
            return SafetyVerdict::fail(format!(
                "⛔ High Wind Alert: {} m/s. Limit is {} m/s.",
                report.wind_speed_mps, self.max_wind_mps
            ));
        }

        SafetyVerdict::pass(format!("✅ Weather Safe: {}", summary))
    }
}
