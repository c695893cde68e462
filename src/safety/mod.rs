pub mod advisory;
pub mod geofence;
pub mod weather;


use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{SafetyConfig, WeatherConfig};
use crate::geo::{distance_meters, GeoPoint};
use crate::route::Waypoint;

pub use advisory::{AdvisoryStage, RiskAdvisor, RiskRequest};
pub use weather::{WeatherReport, WeatherSource, WeatherStage};

/// Outcome of one go/no-go stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub pass: bool,
    pub reason: String,
    /// Set when the stage passed only because its collaborator was unavailable.
    pub warning: bool,
}

impl SafetyVerdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            pass: true,
            reason: reason.into(),
            warning: false,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            reason: reason.into(),
            warning: false,
        }
    }

    /// Fail-open verdict for a collaborator outage.
    pub fn pass_with_warning(reason: impl Into<String>) -> Self {
        Self {
            pass: true,
            reason: reason.into(),
            warning: true,
        }
    }
}

/// Verdicts of the stages that ran, in order. The pipeline stops at the first
/// failing stage, so at most the last entry can be a failure.
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub stages: Vec<SafetyVerdict>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.stages.iter().all(|v| v.pass)
    }

    pub fn failure(&self) -> Option<&SafetyVerdict> {
        self.stages.iter().find(|v| !v.pass)
    }
}

/// Pre-departure go/no-go pipeline.
pub struct SafetyGate {
    weather: WeatherStage,
    advisory: AdvisoryStage,
    geofence_radius_m: f64,
}

impl SafetyGate {
    pub fn new(
        weather_source: Arc<dyn WeatherSource>,
        advisor: Option<Arc<dyn RiskAdvisor>>,
        weather_config: &WeatherConfig,
        safety_config: &SafetyConfig,
    ) -> Self {
        Self {
            weather: WeatherStage::new(weather_source, weather_config.max_wind_mps),
            advisory: AdvisoryStage::new(advisor),
            geofence_radius_m: safety_config.geofence_radius_m,
        }
    }

    /// Weather then advisory risk for a pickup flight from `origin`.
    pub async fn check_pickup(
        &self,
        pickup: GeoPoint,
        origin: GeoPoint,
        battery_percent: f64,
    ) -> GateReport {
        let mut report = GateReport::default();

        let weather = self.weather.evaluate(pickup).await;
        if weather.warning {
            warn!("Weather stage failed open: {}", weather.reason);
        }
        let weather_summary = weather.reason.clone();
        let weather_passed = weather.pass;
        report.stages.push(weather);
        if !weather_passed {
            info!("Pickup {} rejected by weather stage", pickup);
            return report;
        }

        let request = RiskRequest {
            weather_summary,
            battery_percent,
            distance_m: distance_meters(&origin, &pickup).floor() as u64,
        };
        let advisory = self.advisory.evaluate(&request).await;
        if advisory.warning {
            warn!("Advisory stage failed open: {}", advisory.reason);
        }
        if !advisory.pass {
            info!("Pickup {} rejected by advisory stage", pickup);
        }
        report.stages.push(advisory);

        report
    }

    /// Geofence over the whole manifest, run once before the route is flown.
    pub fn check_manifest(&self, origin: GeoPoint, stops: &[Waypoint]) -> SafetyVerdict {
        geofence::check(origin, stops, self.geofence_radius_m)
    }
}
