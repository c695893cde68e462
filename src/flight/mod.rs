
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use serde::Serialize;
use strum_macros::Display;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::battery::SharedBattery;
use crate::cancel::CancellationSignal;
use crate::config::FlightConfig;
use crate::error::MissionError;
use crate::geo::{distance_meters, GeoPoint};
use crate::iot::Notifier;
use crate::route::Waypoint;
use crate::vehicle::{FlightMode, VehicleLink, VehicleState};

/// Horizontal arrival radius for transit legs.
pub const ARRIVAL_RADIUS_M: f64 = 2.0;
/// Altitude tolerance for climb and descent legs.
pub const ALTITUDE_TOLERANCE_M: f64 = 1.0;
/// Below this relative altitude the vehicle counts as landed.
pub const LANDED_ALT_M: f64 = 1.0;

/// Stop indices are positions in the optimized route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(tag = "phase", content = "stop", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPhase {
    #[default]
    Idle,
    Arming,
    Takeoff,
    EnroutePickup,
    DescendScan,
    Ascend,
    EnrouteStop(usize),
    DescendStop(usize),
    Hover(usize),
    ClimbStop(usize),
    Return,
    Landed,
    Aborted,
}

/// Validated delivery plan, consumed by [`FlightStateMachine::deliver`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mission {
    pub pickup: GeoPoint,
    /// Where the manifest was read; geofence and route ordering start here.
    pub origin: GeoPoint,
    /// Optimized visiting order.
    pub stops: Vec<Waypoint>,
}

/// Drives the vehicle through the mission phases by polling telemetry.
///
/// Every polling tick samples the battery model, then checks the cancellation
/// signal, then the phase's arrival condition, then sleeps. No motion command
/// is sent once the signal is raised.
pub struct FlightStateMachine {
    vehicle: Arc<dyn VehicleLink>,
    battery: SharedBattery,
    cancel: CancellationSignal,
    notifier: Arc<dyn Notifier>,
    config: FlightConfig,
    phase: Arc<RwLock<FlightPhase>>,
}

impl FlightStateMachine {
    pub fn new(
        vehicle: Arc<dyn VehicleLink>,
        battery: SharedBattery,
        cancel: CancellationSignal,
        notifier: Arc<dyn Notifier>,
        config: FlightConfig,
    ) -> Self {
        Self {
            vehicle,
            battery,
            cancel,
            notifier,
            config,
            phase: Arc::new(RwLock::new(FlightPhase::Idle)),
        }
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase.read().map(|p| *p).unwrap_or(FlightPhase::Aborted)
    }

    pub fn set_phase(&self, phase: FlightPhase) {
        if let Ok(mut current) = self.phase.write() {
            if *current != phase {
                debug!("Phase {} -> {}", *current, phase);
            }
            *current = phase;
        }
    }

    /// Arms in GUIDED and climbs to the takeoff altitude.
    pub async fn take_off(&self) -> Result<(), MissionError> {
        self.set_phase(FlightPhase::Arming);
        self.wait_armable().await?;

        self.ensure_active()?;
        self.vehicle.set_mode(FlightMode::Guided).await?;
        self.vehicle.arm().await?;
        self.wait_until(|s| s.armed).await?;

        self.set_phase(FlightPhase::Takeoff);
        info!("Taking off to {}m", self.config.takeoff_alt);
        self.ensure_active()?;
        self.vehicle.takeoff(self.config.takeoff_alt).await?;
        let target = self.config.takeoff_alt - ALTITUDE_TOLERANCE_M;
        self.wait_until(|s| s.altitude() >= target).await?;
        Ok(())
    }

    pub async fn fly_to_pickup(&self, pickup: GeoPoint) -> Result<(), MissionError> {
        self.set_phase(FlightPhase::EnroutePickup);
        info!("En route to pickup point {}", pickup);
        self.transit(pickup.with_alt(self.config.takeoff_alt)).await?;
        info!("Arrived at pickup point");
        Ok(())
    }

    /// Drops to scanning height over the current position. Returns that
    /// position so the climb goes straight back up.
    pub async fn descend_for_scan(&self) -> Result<GeoPoint, MissionError> {
        self.set_phase(FlightPhase::DescendScan);
        let hold = self.tick().await?.position;
        self.descend(hold.with_alt(self.config.scan_alt)).await?;
        Ok(hold)
    }

    pub async fn ascend_after_scan(&self, hold: GeoPoint) -> Result<(), MissionError> {
        self.set_phase(FlightPhase::Ascend);
        self.climb(hold.with_alt(self.config.cruise_alt)).await
    }

    /// Visits every stop in order: transit, descend, hover, climb.
    pub async fn deliver(&self, mission: &Mission) -> Result<(), MissionError> {
        self.ensure_active()?;
        self.vehicle.set_mode(FlightMode::Guided).await?;

        let total = mission.stops.len();
        for (i, stop) in mission.stops.iter().enumerate() {
            let number = i + 1;
            info!(
                "Flying to stop {}/{} (manifest #{}): {}",
                number,
                total,
                stop.number(),
                stop.point
            );
            self.notify(&format!("✈️ En route to Stop {}/{}...", number, total))
                .await;

            self.set_phase(FlightPhase::EnrouteStop(i));
            self.transit(stop.point.with_alt(self.config.cruise_alt))
                .await?;

            info!("Arrived at stop {}. Descending...", number);
            self.set_phase(FlightPhase::DescendStop(i));
            self.descend(stop.point.with_alt(self.config.delivery_alt))
                .await?;

            self.set_phase(FlightPhase::Hover(i));
            self.hover().await?;

            self.set_phase(FlightPhase::ClimbStop(i));
            self.climb(stop.point.with_alt(self.config.cruise_alt))
                .await?;
        }
        Ok(())
    }

    /// Hands the vehicle to RTL and waits for touchdown or disarm.
    pub async fn return_to_launch(&self) -> Result<(), MissionError> {
        self.set_phase(FlightPhase::Return);
        self.ensure_active()?;
        self.vehicle.set_mode(FlightMode::Rtl).await?;
        self.wait_until(|s| s.altitude() <= LANDED_ALT_M || !s.armed)
            .await?;
        self.set_phase(FlightPhase::Landed);
        info!("Drone landed. System ready.");
        Ok(())
    }

    async fn transit(&self, target: GeoPoint) -> Result<(), MissionError> {
        self.ensure_active()?;
        self.vehicle.goto(target).await?;
        self.wait_until(|s| {
            let dist = distance_meters(&s.position, &target);
            debug!("Distance to target: {}m", dist as u64);
            dist < ARRIVAL_RADIUS_M
        })
        .await?;
        Ok(())
    }

    async fn descend(&self, target: GeoPoint) -> Result<(), MissionError> {
        self.ensure_active()?;
        self.vehicle.goto(target).await?;
        let ceiling = target.alt + ALTITUDE_TOLERANCE_M;
        self.wait_until(|s| s.altitude() <= ceiling).await?;
        Ok(())
    }

    async fn climb(&self, target: GeoPoint) -> Result<(), MissionError> {
        self.ensure_active()?;
        self.vehicle.goto(target).await?;
        let floor = target.alt - ALTITUDE_TOLERANCE_M;
        self.wait_until(|s| s.altitude() >= floor).await?;
        Ok(())
    }

    async fn hover(&self) -> Result<(), MissionError> {
        let duration = self.config.hover_duration();
        info!("Hovering {:?}", duration);
        let deadline = Instant::now() + duration;
        loop {
            self.tick().await?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    async fn wait_armable(&self) -> Result<(), MissionError> {
        let started = Instant::now();
        loop {
            let state = self.tick().await?;
            if state.armable {
                return Ok(());
            }
            if let Some(limit) = self.config.armable_timeout_secs {
                if started.elapsed().as_secs() >= limit {
                    return Err(MissionError::Vehicle(anyhow!(
                        "Vehicle not armable after {}s",
                        limit
                    )));
                }
            }
            debug!("Waiting for drone to initialize...");
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn wait_until<F>(&self, arrived: F) -> Result<VehicleState, MissionError>
    where
        F: Fn(&VehicleState) -> bool,
    {
        loop {
            let state = self.tick().await?;
            if arrived(&state) {
                return Ok(state);
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    /// One polling step: battery sample, then cancellation check.
    async fn tick(&self) -> Result<VehicleState, MissionError> {
        let state = self.vehicle.snapshot()?;

        let action = {
            let mut battery = self
                .battery
                .lock()
                .map_err(|e| anyhow!("Lock error: {}", e))?;
            battery.sample(state.position, state.mode)
        };

        if let Some(action) = action {
            self.cancel.raise();
            let mode = action.mode();
            warn!("Battery failsafe: commanding {}", mode);
            self.vehicle.set_mode(mode).await?;
            self.notify(&format!("⚠️ Battery failsafe. Forcing {}.", mode))
                .await;
            return Err(MissionError::Aborted(format!(
                "battery failsafe, {} commanded",
                mode
            )));
        }

        self.ensure_active()?;
        Ok(state)
    }

    fn ensure_active(&self) -> Result<(), MissionError> {
        if self.cancel.is_raised() {
            info!("Stopping flight loop due to emergency");
            return Err(MissionError::Aborted("emergency stop".to_string()));
        }
        Ok(())
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!("Failed to send status '{}': {:#}", text, e);
        }
    }
}
