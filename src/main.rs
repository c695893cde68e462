use std::sync::Arc;

use anyhow::Result;

use parcel_pilot::battery::BatteryModel;
use parcel_pilot::config::CONFIG;
use parcel_pilot::geo::GeoPoint;
use parcel_pilot::iot::telemetry::TelemetryPublisher;
use parcel_pilot::iot::{MqttChannel, TopicScanner};
use parcel_pilot::mav_server::MavlinkServer;
use parcel_pilot::safety::{RiskAdvisor, SafetyGate};
use parcel_pilot::services::{ChatRiskAdvisor, OpenWeatherClient};
use parcel_pilot::sim::SimulatedVehicle;
use parcel_pilot::supervisor::{run_listener, MissionSupervisor};
use parcel_pilot::util::resolve_vehicle_id;
use parcel_pilot::vehicle::VehicleLink;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Home position for dry runs (ArduPilot SITL default site).
const SIM_HOME: GeoPoint = GeoPoint::new(-35.363261, 149.165230, 0.0);
const SIM_STEP_M: f64 = 5.0;
const SIM_TICK: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    info!("Application starting...");

    let vehicle_id = resolve_vehicle_id(&CONFIG.general.vehicle_id);
    info!("Vehicle id: {}", vehicle_id);

    let (shutdown_tx, _) = broadcast::channel(1);

    let vehicle: Arc<dyn VehicleLink>;
    let mav_handle = if CONFIG.mavlink.connection_string == "sim" {
        info!("Using simulated vehicle");
        let sim = SimulatedVehicle::new(SIM_HOME, SIM_STEP_M);
        vehicle = sim.clone();
        spawn_simulator(sim, shutdown_tx.subscribe())
    } else {
        let server = Arc::new(MavlinkServer::connect(&CONFIG.mavlink)?);
        vehicle = server.clone();
        spawn_mavlink_server(server, shutdown_tx.subscribe())
    };

    let mut channel = MqttChannel::new(&vehicle_id, CONFIG.broker.clone());
    let (inbound, broker_handle) = channel.connect().await?;
    let client = channel.client();
    let telemetry_topic = channel.topics().telemetry.clone();
    let channel = Arc::new(channel);

    let scanner = Arc::new(TopicScanner::new(
        inbound.manifests,
        Duration::from_secs(CONFIG.scanner.timeout_secs),
    ));

    let advisor: Option<Arc<dyn RiskAdvisor>> = if CONFIG.advisory.enabled {
        Some(Arc::new(ChatRiskAdvisor::new(&CONFIG.advisory)?))
    } else {
        info!("Risk advisory disabled in config, skipping...");
        None
    };
    let gate = SafetyGate::new(
        Arc::new(OpenWeatherClient::new(&CONFIG.weather)?),
        advisor,
        &CONFIG.weather,
        &CONFIG.safety,
    );

    let supervisor = Arc::new(MissionSupervisor::new(
        vehicle_id,
        vehicle,
        channel.clone(),
        scanner,
        gate,
        BatteryModel::shared(CONFIG.battery.clone()),
        CONFIG.flight.clone(),
    ));

    let listener_handle = tokio::spawn(run_listener(
        supervisor.clone(),
        inbound.commands,
        shutdown_tx.subscribe(),
    ));

    let telemetry_handle = match client {
        Some(client) => spawn_telemetry(
            TelemetryPublisher::new(
                client,
                supervisor.clone(),
                telemetry_topic,
                Duration::from_secs(CONFIG.telemetry.interval_secs),
            ),
            shutdown_tx.subscribe(),
        ),
        None => tokio::spawn(async {}),
    };

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping services...");
                if shutdown_tx.send(()).is_err() {
                    error!("No services listening for shutdown");
                }
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    };

    let results = tokio::join!(mav_handle, listener_handle, telemetry_handle, shutdown_signal);

    for (result, name) in [results.0, results.1, results.2]
        .into_iter()
        .zip(["Vehicle link", "Command listener", "Telemetry publisher"])
    {
        if let Err(e) = result {
            error!("{} join error: {}", name, e);
        }
    }

    channel.stop().await;
    broker_handle.abort();
    info!("All services stopped, shutting down");

    Ok(())
}

fn spawn_mavlink_server(
    server: Arc<MavlinkServer>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = server.start() => {
                if let Err(e) = result {
                    error!("MAVLink server error: {:#}", e);
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down MAVLink server...");
                server.stop().await;
            }
        }
    })
}

fn spawn_simulator(
    sim: Arc<SimulatedVehicle>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = sim.run(SIM_TICK) => {}
            _ = shutdown.recv() => {
                info!("Shutting down simulated vehicle...");
            }
        }
    })
}

fn spawn_telemetry(
    publisher: TelemetryPublisher,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = publisher.run() => {}
            _ = shutdown.recv() => {
                info!("Shutting down telemetry publisher...");
                publisher.stop();
            }
        }
    })
}

fn setup_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&CONFIG.general.log_level))?
                .add_directive("rumqttc=info".parse()?)
                .add_directive("reqwest=info".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .try_init()?;
    Ok(())
}
