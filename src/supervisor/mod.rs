#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::battery::{self, SharedBattery};
use crate::cancel::CancellationSignal;
use crate::config::FlightConfig;
use crate::error::MissionError;
use crate::flight::{FlightPhase, FlightStateMachine, Mission};
use crate::geo::GeoPoint;
use crate::iot::{ManifestScanner, Notifier};
use crate::manifest::{parse_command, parse_manifest, Command, USAGE};
use crate::route;
use crate::safety::SafetyGate;
use crate::vehicle::{FlightMode, VehicleLink};

/// Snapshot published on the telemetry topic.
#[derive(Debug, Clone, Serialize)]
pub struct MissionStatus {
    pub vehicle_id: String,
    pub timestamp: i64,
    pub phase: FlightPhase,
    pub battery_percent: f64,
    pub position: GeoPoint,
    pub armed: bool,
    pub mode: FlightMode,
}

/// Top-level coordinator: turns operator commands into missions and aborts.
///
/// Command handling never waits on a mission. Missions run on their own task
/// and the abort path only touches the cancellation signal and the vehicle
/// mode, so `stop` takes effect while a flight loop is sleeping.
pub struct MissionSupervisor {
    vehicle_id: String,
    vehicle: Arc<dyn VehicleLink>,
    notifier: Arc<dyn Notifier>,
    scanner: Arc<dyn ManifestScanner>,
    gate: SafetyGate,
    battery: SharedBattery,
    cancel: CancellationSignal,
    flight: FlightStateMachine,
    active: AtomicBool,
}

impl MissionSupervisor {
    pub fn new(
        vehicle_id: String,
        vehicle: Arc<dyn VehicleLink>,
        notifier: Arc<dyn Notifier>,
        scanner: Arc<dyn ManifestScanner>,
        gate: SafetyGate,
        battery: SharedBattery,
        flight_config: FlightConfig,
    ) -> Self {
        let cancel = CancellationSignal::new();
        let flight = FlightStateMachine::new(
            vehicle.clone(),
            battery.clone(),
            cancel.clone(),
            notifier.clone(),
            flight_config,
        );
        Self {
            vehicle_id,
            vehicle,
            notifier,
            scanner,
            gate,
            battery,
            cancel,
            flight,
            active: AtomicBool::new(false),
        }
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    pub fn phase(&self) -> FlightPhase {
        self.flight.phase()
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Result<MissionStatus> {
        let state = self.vehicle.snapshot()?;
        Ok(MissionStatus {
            vehicle_id: self.vehicle_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            phase: self.flight.phase(),
            battery_percent: battery::level_of(&self.battery)?,
            position: state.position,
            armed: state.armed,
            mode: state.mode,
        })
    }

    /// Handles one inbound operator message. Returns the mission task when
    /// the message started one.
    pub async fn handle_command(self: &Arc<Self>, text: &str) -> Option<JoinHandle<()>> {
        debug!("Command received: {:?}", text);
        match parse_command(text) {
            Ok(Command::Help) => {
                self.notify(USAGE).await;
                None
            }
            Ok(Command::Abort) => {
                self.abort().await;
                None
            }
            Ok(Command::Deliver { pickup }) => self.dispatch(pickup).await,
            Err(e) => {
                info!("Rejected command {:?}: {}", text, e);
                self.notify(&e.to_string()).await;
                None
            }
        }
    }

    /// Raises the cancellation signal and hands the vehicle to RTL.
    pub async fn abort(&self) {
        warn!("Emergency stop requested");
        self.cancel.raise();
        if let Err(e) = self.vehicle.set_mode(FlightMode::Rtl).await {
            error!("Failed to command RTL: {:#}", e);
            self.notify(&MissionError::Vehicle(e).to_string()).await;
            return;
        }
        self.notify("🚨 EMERGENCY STOP RECEIVED! Aborting Mission & Returning to Launch (RTL).")
            .await;
    }

    async fn dispatch(self: &Arc<Self>, pickup: GeoPoint) -> Option<JoinHandle<()>> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Ignoring pickup {}: mission in progress", pickup);
            self.notify("⏳ Mission already in progress. Send 'stop' to abort.")
                .await;
            return None;
        }

        self.cancel.reset();
        self.rearm_failsafes();
        self.flight.set_phase(FlightPhase::Idle);

        let supervisor = self.clone();
        Some(tokio::spawn(async move {
            let result = supervisor.run_mission(pickup).await;
            supervisor.finish(result).await;
            supervisor.active.store(false, Ordering::SeqCst);
        }))
    }

    fn rearm_failsafes(&self) {
        match self.battery.lock() {
            Ok(mut battery) => battery.arm_failsafes(),
            Err(e) => error!("Lock error: {}", e),
        }
    }

    /// Gate, pickup, scan, route, deliver, return.
    pub async fn run_mission(&self, pickup: GeoPoint) -> Result<(), MissionError> {
        info!("Mission requested for pickup {}", pickup);
        let origin = self.vehicle.snapshot()?.position;
        let battery_percent = battery::level_of(&self.battery)?;

        self.notify("🌤️ Checking weather...").await;
        let report = self
            .gate
            .check_pickup(pickup, origin, battery_percent)
            .await;
        let mut stages = report.stages.iter();
        if let Some(weather) = stages.next() {
            self.notify(&weather.reason).await;
            if !weather.pass {
                return Err(MissionError::rejected("Mission Rejected due to Weather."));
            }
        }
        if let Some(advisory) = stages.next() {
            self.notify(&format!("🤖 AI Co-Pilot: {}", advisory.reason))
                .await;
            if !advisory.pass {
                return Err(MissionError::rejected(
                    "Mission ABORTED by AI Safety Officer.",
                ));
            }
        }

        self.notify("✅ AI Clearance Received. Dispatching Drone...")
            .await;
        self.flight.take_off().await?;
        self.flight.fly_to_pickup(pickup).await?;

        let scan_alt = self.flight.config().scan_alt;
        self.notify(&format!("⬇️ Arrived. Descending to {}m...", scan_alt))
            .await;
        let hold = self.flight.descend_for_scan().await?;

        self.notify("📷 Ready. Show manifest.").await;
        let scanned = tokio::select! {
            scanned = self.scanner.scan() => scanned,
            _ = self.cancel.raised() => {
                info!("Manifest scan interrupted by emergency stop");
                return Err(MissionError::Aborted("emergency stop".to_string()));
            }
        };
        let raw = match scanned {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Manifest scanner failed: {:#}", e);
                None
            }
        };

        let cruise_alt = self.flight.config().cruise_alt;
        self.notify(&format!("✅ Climbing to {}m...", cruise_alt))
            .await;
        self.flight.ascend_after_scan(hold).await?;

        let stops = parse_manifest(raw.as_deref())?;
        let geofence = self.gate.check_manifest(hold, &stops);
        if !geofence.pass {
            return Err(MissionError::Rejected(geofence.reason));
        }

        let mission = Mission {
            pickup,
            origin: hold,
            stops: route::optimize(hold, stops),
        };
        info!(
            "Route: {:?}",
            mission.stops.iter().map(|s| s.number()).collect::<Vec<_>>()
        );
        self.notify(&format!(
            "✅ Mission Accepted. Optimized Path for {} stops.",
            mission.stops.len()
        ))
        .await;
        self.flight.deliver(&mission).await?;

        self.notify("✅ Deliveries Done. Returning Home.").await;
        self.flight.return_to_launch().await?;
        self.notify("🛬 Drone Landed. System Ready.").await;
        Ok(())
    }

    async fn finish(&self, result: Result<(), MissionError>) {
        let Err(e) = result else {
            info!("Mission complete");
            return;
        };

        let airborne = self.flight.phase() != FlightPhase::Idle;
        match &e {
            MissionError::Aborted(reason) => {
                warn!("Mission aborted: {}", reason);
                self.flight.set_phase(FlightPhase::Aborted);
            }
            MissionError::Vehicle(err) => error!("Mission failed: {:#}", err),
            other => info!("Mission not flown: {}", other),
        }
        self.notify(&e.to_string()).await;

        if airborne && matches!(e, MissionError::Input(_) | MissionError::Rejected(_)) {
            self.notify("Holding position. Send 'stop' to return to launch.")
                .await;
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!("Failed to send status '{}': {:#}", text, e);
        }
    }
}

/// Feeds inbound commands to the supervisor until shutdown or until the
/// command channel closes.
pub async fn run_listener(
    supervisor: Arc<MissionSupervisor>,
    mut commands: mpsc::UnboundedReceiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Command listener started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down command listener");
                break;
            }
            message = commands.recv() => match message {
                Some(text) => {
                    supervisor.handle_command(&text).await;
                }
                None => {
                    warn!("Command channel closed");
                    break;
                }
            }
        }
    }
}
