use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::config::BatteryConfig;
use crate::geo::{distance_meters, GeoPoint};
use crate::vehicle::FlightMode;

pub type SharedBattery = Arc<Mutex<BatteryModel>>;

/// Mode change the battery model asks the caller to command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailsafeAction {
    Land,
    ReturnToLaunch,
}

impl FailsafeAction {
    pub fn mode(self) -> FlightMode {
        match self {
            FailsafeAction::Land => FlightMode::Land,
            FailsafeAction::ReturnToLaunch => FlightMode::Rtl,
        }
    }
}

/// Distance-driven energy estimate.
///
/// Drain is derived from ground distance covered between samples, not from
/// elapsed time, so it must be sampled at every polling tick.
#[derive(Debug, Clone)]
pub struct BatteryModel {
    level_percent: f64,
    last_sample: Option<GeoPoint>,
    land_issued: bool,
    rtl_issued: bool,
    config: BatteryConfig,
}

impl BatteryModel {
    pub fn new(config: BatteryConfig) -> Self {
        Self {
            level_percent: config.initial_percent.clamp(0.0, 100.0),
            last_sample: None,
            land_issued: false,
            rtl_issued: false,
            config,
        }
    }

    pub fn shared(config: BatteryConfig) -> SharedBattery {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn level_percent(&self) -> f64 {
        self.level_percent
    }

    pub fn last_sample_position(&self) -> Option<GeoPoint> {
        self.last_sample
    }

    /// Re-enables both failsafes for a new mission. The level and reference
    /// position carry over because they describe the physical pack.
    pub fn arm_failsafes(&mut self) {
        self.land_issued = false;
        self.rtl_issued = false;
    }

    /// Records the vehicle position and returns the failsafe to command, if any.
    pub fn sample(&mut self, position: GeoPoint, mode: FlightMode) -> Option<FailsafeAction> {
        let Some(reference) = self.last_sample else {
            self.last_sample = Some(position);
            return None;
        };

        let moved = distance_meters(&position, &reference);
        if moved > self.config.noise_floor_m {
            let drain = moved * self.config.drain_rate_per_meter;
            self.level_percent = (self.level_percent - drain).max(0.0);
            self.last_sample = Some(position);
        }

        debug!(
            "BATT: {:.1}% ({}) | last move: {:.1}m",
            self.level_percent,
            self.band(),
            moved
        );

        self.failsafe(mode)
    }

    fn failsafe(&mut self, mode: FlightMode) -> Option<FailsafeAction> {
        if self.level_percent <= 0.0 {
            if self.land_issued {
                return None;
            }
            self.land_issued = true;
            warn!("Battery depleted, forcing LAND");
            return Some(FailsafeAction::Land);
        }

        if self.level_percent < self.config.critical_percent
            && mode != FlightMode::Rtl
            && !self.rtl_issued
        {
            self.rtl_issued = true;
            warn!(
                "Critical battery ({:.1}% < {}%), forcing RTL",
                self.level_percent, self.config.critical_percent
            );
            return Some(FailsafeAction::ReturnToLaunch);
        }

        None
    }

    fn band(&self) -> &'static str {
        if self.level_percent > 50.0 {
            "nominal"
        } else if self.level_percent > 20.0 {
            "low"
        } else {
            "critical"
        }
    }
}

/// Reads the current level through the shared handle.
pub fn level_of(battery: &SharedBattery) -> Result<f64> {
    let model = battery.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
    Ok(model.level_percent())
}
