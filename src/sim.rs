use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::geo::{distance_meters, GeoPoint};
use crate::vehicle::{FlightMode, VehicleLink, VehicleState};

/// Command as received by the simulated flight controller.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    SetMode(FlightMode),
    Arm,
    Takeoff(f64),
    Goto(GeoPoint),
}

#[derive(Debug)]
struct SimState {
    vehicle: VehicleState,
    home: GeoPoint,
    target: Option<GeoPoint>,
    holding: bool,
}

/// Kinematic stand-in for the flight controller, used for dry runs when the
/// MAVLink connection string is `sim`.
///
/// Each [`SimulatedVehicle::step`] moves the vehicle at most `step_m`
/// horizontally and vertically toward its current target. Telemetry reads do
/// not move it, so the flight speed only depends on the stepping interval.
#[derive(Debug)]
pub struct SimulatedVehicle {
    state: RwLock<SimState>,
    log: Mutex<Vec<VehicleCommand>>,
    step_m: f64,
}

impl SimulatedVehicle {
    pub fn new(home: GeoPoint, step_m: f64) -> Arc<Self> {
        let vehicle = VehicleState {
            position: home.with_alt(0.0),
            armable: true,
            ..Default::default()
        };
        Arc::new(Self {
            state: RwLock::new(SimState {
                vehicle,
                home: home.with_alt(0.0),
                target: None,
                holding: false,
            }),
            log: Mutex::new(Vec::new()),
            step_m,
        })
    }

    /// Every command received so far, oldest first.
    pub fn commands(&self) -> Vec<VehicleCommand> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn goto_targets(&self) -> Vec<GeoPoint> {
        self.commands()
            .into_iter()
            .filter_map(|cmd| match cmd {
                VehicleCommand::Goto(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Freezes the airframe in place, e.g. to model a stalled transit.
    pub fn set_holding(&self, holding: bool) -> Result<()> {
        self.write()?.holding = holding;
        Ok(())
    }

    pub fn set_armable(&self, armable: bool) -> Result<()> {
        self.write()?.vehicle.armable = armable;
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SimState>> {
        self.state.write().map_err(|e| anyhow!("Lock error: {}", e))
    }

    fn record(&self, command: VehicleCommand) -> Result<()> {
        debug!("Sim received {:?}", command);
        self.log
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?
            .push(command);
        Ok(())
    }

    /// Moves the airframe one step toward its current target.
    pub fn step(&self) -> Result<()> {
        let mut sim = self.write()?;
        self.advance(&mut sim);
        Ok(())
    }

    /// Steps the airframe every `interval`. Runs until the task is dropped.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        loop {
            if let Err(e) = self.step() {
                error!("Sim step failed: {:#}", e);
            }
            sleep(interval).await;
        }
    }

    fn advance(&self, sim: &mut SimState) {
        if sim.holding {
            return;
        }
        let Some(target) = sim.target else {
            return;
        };

        let pos = &mut sim.vehicle.position;
        let horizontal = distance_meters(pos, &target);
        if horizontal <= self.step_m {
            pos.lat = target.lat;
            pos.lon = target.lon;
        } else {
            let ratio = self.step_m / horizontal;
            pos.lat += (target.lat - pos.lat) * ratio;
            pos.lon += (target.lon - pos.lon) * ratio;
        }

        let vertical = target.alt - pos.alt;
        pos.alt += vertical.clamp(-self.step_m, self.step_m);

        let on_ground = pos.alt <= 0.0;
        let returning = matches!(sim.vehicle.mode, FlightMode::Rtl | FlightMode::Land);
        if returning && on_ground && sim.vehicle.armed {
            info!("Sim touchdown, disarming");
            sim.vehicle.armed = false;
            sim.target = None;
        }
    }
}

#[async_trait]
impl VehicleLink for SimulatedVehicle {
    fn snapshot(&self) -> Result<VehicleState> {
        let sim = self
            .state
            .read()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        Ok(sim.vehicle.clone())
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<()> {
        self.record(VehicleCommand::SetMode(mode))?;
        let mut sim = self.write()?;
        sim.vehicle.mode = mode;
        match mode {
            FlightMode::Rtl => sim.target = Some(sim.home),
            FlightMode::Land => sim.target = Some(sim.vehicle.position.with_alt(0.0)),
            _ => {}
        }
        Ok(())
    }

    async fn arm(&self) -> Result<()> {
        self.record(VehicleCommand::Arm)?;
        let mut sim = self.write()?;
        if !sim.vehicle.armable {
            bail!("Vehicle not armable");
        }
        sim.vehicle.armed = true;
        Ok(())
    }

    async fn takeoff(&self, altitude: f64) -> Result<()> {
        self.record(VehicleCommand::Takeoff(altitude))?;
        let mut sim = self.write()?;
        if sim.vehicle.armed {
            sim.target = Some(sim.vehicle.position.with_alt(altitude));
        }
        Ok(())
    }

    async fn goto(&self, target: GeoPoint) -> Result<()> {
        self.record(VehicleCommand::Goto(target))?;
        let mut sim = self.write()?;
        if sim.vehicle.armed && sim.vehicle.mode == FlightMode::Guided {
            sim.target = Some(target);
        }
        Ok(())
    }
}
