use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mavlink::ardupilotmega::{
    GpsFixType, MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavState, MavType,
    PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA, SET_POSITION_TARGET_GLOBAL_INT_DATA,
};
use mavlink::{MavConnection, MavHeader};
use tracing::{debug, error, info, warn};

use crate::config::MavlinkConfig;
use crate::geo::GeoPoint;
use crate::vehicle::{FlightMode, VehicleLink, VehicleState};

type Connection = Arc<Box<dyn MavConnection<MavMessage> + Send + Sync>>;

/// Our identity on the link: a ground control station.
const GCS_SYSTEM_ID: u8 = 255;
const GCS_COMPONENT_ID: u8 = 190;
/// Position-only setpoint: ignore velocity, acceleration and yaw fields.
const POSITION_ONLY_MASK: u16 = 0b0000_1111_1111_1000;

/// Raw link state not exposed through [`VehicleState`].
#[derive(Debug, Default)]
struct LinkState {
    vehicle: VehicleState,
    gps_fix: bool,
    system_ready: bool,
}

/// MAVLink connection to an ArduCopter flight controller.
pub struct MavlinkServer {
    connection: Connection,
    state: Arc<RwLock<LinkState>>,
    target_system: Arc<AtomicU8>,
    heartbeat_interval: Duration,
    running: Arc<AtomicBool>,
}

impl MavlinkServer {
    pub fn connect(config: &MavlinkConfig) -> Result<Self> {
        info!("Connecting to flight controller on {}...", config.connection_string);
        let connection = mavlink::connect::<MavMessage>(&config.connection_string)
            .with_context(|| format!("Failed to connect to {}", config.connection_string))?;

        Ok(Self {
            connection: Arc::new(connection),
            state: Arc::new(RwLock::new(LinkState::default())),
            target_system: Arc::new(AtomicU8::new(1)),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Runs the telemetry reader and the GCS heartbeat until stopped.
    pub async fn start(&self) -> Result<()> {
        let reader = {
            let connection = self.connection.clone();
            let state = self.state.clone();
            let target_system = self.target_system.clone();
            let running = self.running.clone();
            tokio::task::spawn_blocking(move || {
                Self::read_loop(connection, state, target_system, running)
            })
        };

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.send(&Self::gcs_heartbeat()) {
                warn!("Failed to send heartbeat: {:#}", e);
            }
            tokio::time::sleep(self.heartbeat_interval).await;
        }

        reader.await.context("MAVLink reader panicked")?
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn read_loop(
        connection: Connection,
        state: Arc<RwLock<LinkState>>,
        target_system: Arc<AtomicU8>,
        running: Arc<AtomicBool>,
    ) -> Result<()> {
        info!("MAVLink reader started");
        while running.load(Ordering::SeqCst) {
            match connection.recv() {
                Ok((header, message)) => {
                    let mut link = state.write().map_err(|e| anyhow!("Lock error: {}", e))?;
                    if apply_message(&mut link, &message) {
                        target_system.store(header.system_id, Ordering::SeqCst);
                    }
                }
                Err(mavlink::error::MessageReadError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("MAVLink read error: {:?}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
        info!("MAVLink reader stopped");
        Ok(())
    }

    fn send(&self, message: &MavMessage) -> Result<()> {
        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: 0,
        };
        self.connection
            .send(&header, message)
            .map_err(|e| anyhow!("MAVLink write failed: {:?}", e))?;
        Ok(())
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<()> {
        debug!("COMMAND_LONG {:?} {:?}", command, params);
        self.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target_system.load(Ordering::SeqCst),
            target_component: 1,
            confirmation: 0,
        }))
    }

    fn gcs_heartbeat() -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        })
    }
}

/// Folds one telemetry message into the link state. Returns true for a
/// vehicle heartbeat, whose sender becomes the command target.
fn apply_message(link: &mut LinkState, message: &MavMessage) -> bool {
    match message {
        MavMessage::HEARTBEAT(hb) if hb.mavtype != MavType::MAV_TYPE_GCS => {
            let vehicle = &mut link.vehicle;
            vehicle.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            vehicle.mode = FlightMode::from_custom_mode(hb.custom_mode);
            vehicle.last_heartbeat = Some(SystemTime::now());
            link.system_ready = !matches!(
                hb.system_status,
                MavState::MAV_STATE_UNINIT | MavState::MAV_STATE_BOOT | MavState::MAV_STATE_CALIBRATING
            );
            link.vehicle.armable = link.system_ready && link.gps_fix;
            true
        }
        MavMessage::GLOBAL_POSITION_INT(pos) => {
            link.vehicle.position = GeoPoint::new(
                f64::from(pos.lat) / 1e7,
                f64::from(pos.lon) / 1e7,
                f64::from(pos.relative_alt) / 1000.0,
            );
            false
        }
        MavMessage::GPS_RAW_INT(gps) => {
            link.gps_fix = !matches!(
                gps.fix_type,
                GpsFixType::GPS_FIX_TYPE_NO_GPS | GpsFixType::GPS_FIX_TYPE_NO_FIX
            );
            link.vehicle.armable = link.system_ready && link.gps_fix;
            false
        }
        MavMessage::SYS_STATUS(status) => {
            link.vehicle.reported_battery =
                (status.battery_remaining >= 0).then_some(f32::from(status.battery_remaining));
            false
        }
        _ => false,
    }
}

#[async_trait]
impl VehicleLink for MavlinkServer {
    fn snapshot(&self) -> Result<VehicleState> {
        let link = self
            .state
            .read()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        Ok(link.vehicle.clone())
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<()> {
        let custom_mode = mode
            .custom_mode()
            .ok_or_else(|| anyhow!("Cannot command mode {}", mode))?;
        info!("Setting mode {}", mode);
        let custom_enabled = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits();
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [f32::from(custom_enabled), custom_mode as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    async fn arm(&self) -> Result<()> {
        info!("Arming");
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    async fn takeoff(&self, altitude: f64) -> Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude as f32],
        )
    }

    async fn goto(&self, target: GeoPoint) -> Result<()> {
        debug!("Goto {} at {}m", target, target.alt);
        self.send(&MavMessage::SET_POSITION_TARGET_GLOBAL_INT(
            SET_POSITION_TARGET_GLOBAL_INT_DATA {
                lat_int: (target.lat * 1e7).round() as i32,
                lon_int: (target.lon * 1e7).round() as i32,
                alt: target.alt as f32,
                type_mask: PositionTargetTypemask::from_bits_truncate(POSITION_ONLY_MASK),
                target_system: self.target_system.load(Ordering::SeqCst),
                target_component: 1,
                coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
                ..Default::default()
            },
        ))
    }
}
