use anyhow::{bail, Result};
use config::{Environment, File};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub mavlink: MavlinkConfig,
    pub broker: BrokerConfig,
    pub weather: WeatherConfig,
    pub advisory: AdvisoryConfig,
    pub battery: BatteryConfig,
    pub flight: FlightConfig,
    pub safety: SafetyConfig,
    pub scanner: ScannerConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Empty means derive it from the primary MAC address.
    pub vehicle_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            vehicle_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MavlinkConfig {
    /// `sim` selects the built-in simulated vehicle.
    pub connection_string: String,
    pub heartbeat_interval_ms: u64,
}

impl Default for MavlinkConfig {
    fn default() -> Self {
        Self {
            connection_string: "tcpout:127.0.0.1:5762".to_string(),
            heartbeat_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_wind_mps: f64,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            api_key: String::new(),
            max_wind_mps: 10.0,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub initial_percent: f64,
    pub drain_rate_per_meter: f64,
    pub noise_floor_m: f64,
    pub critical_percent: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            initial_percent: 100.0,
            drain_rate_per_meter: 0.05,
            noise_floor_m: 0.1,
            critical_percent: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    pub takeoff_alt: f64,
    pub cruise_alt: f64,
    pub delivery_alt: f64,
    pub scan_alt: f64,
    pub hover_secs: f64,
    pub poll_interval_ms: u64,
    /// Unset keeps waiting for the vehicle to become armable indefinitely.
    pub armable_timeout_secs: Option<u64>,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            takeoff_alt: 15.0,
            cruise_alt: 20.0,
            delivery_alt: 10.0,
            scan_alt: 3.0,
            hover_secs: 15.0,
            poll_interval_ms: 1000,
            armable_timeout_secs: None,
        }
    }
}

impl FlightConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Zero for values that are not a representable duration; `validate`
    /// rejects those at load time.
    pub fn hover_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.hover_secs).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if Duration::try_from_secs_f64(self.hover_secs).is_err() {
            bail!(
                "flight.hover_secs must be a non-negative number of seconds, got {}",
                self.hover_secs
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub geofence_radius_m: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            geofence_radius_m: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { interval_secs: 2 }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_path = format!("config/{}.toml", env);
        let fallback_path = format!("/etc/parcel-pilot/{}.toml", env);

        if Path::new(&config_path).exists() {
            Self::load_from(&config_path)
        } else {
            Self::load_from(&fallback_path)
        }
    }

    /// Loads a TOML file, then applies `PARCEL_`-prefixed environment overrides
    /// (e.g. `PARCEL_WEATHER__API_KEY`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("PARCEL").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.flight.validate()?;
        Ok(config)
    }
}
