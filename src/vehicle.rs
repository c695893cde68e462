use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::geo::GeoPoint;

/// ArduCopter flight modes the supervisor commands or needs to recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightMode {
    #[default]
    Stabilize,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Land,
    Unknown,
}

impl FlightMode {
    /// ArduCopter `custom_mode` number.
    pub fn custom_mode(self) -> Option<u32> {
        match self {
            FlightMode::Stabilize => Some(0),
            FlightMode::Auto => Some(3),
            FlightMode::Guided => Some(4),
            FlightMode::Loiter => Some(5),
            FlightMode::Rtl => Some(6),
            FlightMode::Land => Some(9),
            FlightMode::Unknown => None,
        }
    }

    pub fn from_custom_mode(mode: u32) -> Self {
        match mode {
            0 => FlightMode::Stabilize,
            3 => FlightMode::Auto,
            4 => FlightMode::Guided,
            5 => FlightMode::Loiter,
            6 => FlightMode::Rtl,
            9 => FlightMode::Land,
            _ => FlightMode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    pub position: GeoPoint,
    pub armed: bool,
    pub armable: bool,
    pub mode: FlightMode,
    /// Battery percentage as reported by the autopilot, informational only.
    pub reported_battery: Option<f32>,
    pub last_heartbeat: Option<std::time::SystemTime>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            position: GeoPoint::default(),
            armed: false,
            armable: false,
            mode: FlightMode::Stabilize,
            reported_battery: None,
            last_heartbeat: None,
        }
    }
}

impl VehicleState {
    pub fn altitude(&self) -> f64 {
        self.position.alt
    }
}

/// Telemetry and command link to the flight controller.
///
/// Writes are fire-and-forget: callers observe their effect by polling
/// [`VehicleLink::snapshot`].
#[async_trait]
pub trait VehicleLink: Send + Sync {
    fn snapshot(&self) -> Result<VehicleState>;

    async fn set_mode(&self, mode: FlightMode) -> Result<()>;

    async fn arm(&self) -> Result<()>;

    async fn takeoff(&self, altitude: f64) -> Result<()>;

    async fn goto(&self, target: GeoPoint) -> Result<()>;
}
