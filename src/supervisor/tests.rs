use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::{sleep, timeout, Duration};

use super::*;
use crate::battery::BatteryModel;
use crate::config::{BatteryConfig, SafetyConfig, WeatherConfig};
use crate::safety::{RiskAdvisor, RiskRequest, WeatherReport, WeatherSource};
use crate::sim::{SimulatedVehicle, VehicleCommand};

const SAFE: &str = "VERDICT: SAFE | REASON: Conditions nominal.";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct FixedWeather(WeatherReport);

#[async_trait]
impl WeatherSource for FixedWeather {
    async fn current(&self, _point: GeoPoint) -> Result<WeatherReport> {
        Ok(self.0.clone())
    }
}

struct FixedAdvisor(String);

#[async_trait]
impl RiskAdvisor for FixedAdvisor {
    async fn assess(&self, _request: &RiskRequest) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Publishes a manifest only after a long delay.
struct SlowScanner(Duration);

#[async_trait]
impl ManifestScanner for SlowScanner {
    async fn scan(&self) -> Result<Option<String>> {
        sleep(self.0).await;
        Ok(Some("-35.366,149.168,20".to_string()))
    }
}

struct FixedScanner(Option<String>);

#[async_trait]
impl ManifestScanner for FixedScanner {
    async fn scan(&self) -> Result<Option<String>> {
        self.0
            .clone()
            .map(Some)
            .ok_or_else(|| anyhow!("camera offline"))
    }
}

fn weather(condition: &str, wind: f64) -> WeatherReport {
    WeatherReport {
        condition: condition.to_string(),
        description: condition.to_lowercase(),
        wind_speed_mps: wind,
        temp_c: 21.0,
    }
}

struct Harness {
    sim: Arc<SimulatedVehicle>,
    notifier: Arc<RecordingNotifier>,
    supervisor: Arc<MissionSupervisor>,
}

fn harness(report: WeatherReport, verdict: &str, manifest: Option<&str>, step_m: f64) -> Harness {
    let scanner = Arc::new(FixedScanner(manifest.map(str::to_string)));
    harness_with_scanner(report, verdict, scanner, step_m)
}

fn harness_with_scanner(
    report: WeatherReport,
    verdict: &str,
    scanner: Arc<dyn ManifestScanner>,
    step_m: f64,
) -> Harness {
    let sim = SimulatedVehicle::new(GeoPoint::new(-35.3632, 149.1652, 0.0), step_m);
    tokio::spawn(sim.clone().run(Duration::from_millis(1)));
    let notifier = Arc::new(RecordingNotifier::default());
    let gate = SafetyGate::new(
        Arc::new(FixedWeather(report)),
        Some(Arc::new(FixedAdvisor(verdict.to_string()))),
        &WeatherConfig::default(),
        &SafetyConfig::default(),
    );
    let flight_config = FlightConfig {
        hover_secs: 0.01,
        poll_interval_ms: 1,
        ..Default::default()
    };
    let supervisor = Arc::new(MissionSupervisor::new(
        "test-drone".to_string(),
        sim.clone(),
        notifier.clone(),
        scanner,
        gate,
        BatteryModel::shared(BatteryConfig::default()),
        flight_config,
    ));
    Harness {
        sim,
        notifier,
        supervisor,
    }
}

async fn wait_for_phase(supervisor: &MissionSupervisor, phase: FlightPhase) {
    timeout(Duration::from_secs(10), async {
        while supervisor.phase() != phase {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("phase never reached");
}

#[tokio::test]
async fn cleared_pickup_flies_to_pickup() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, None, 50.0);

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    mission.await?;

    let pickup = GeoPoint::new(-35.363, 149.165, 15.0);
    assert_eq!(h.sim.goto_targets().first(), Some(&pickup));

    let sent = h.notifier.sent();
    assert_eq!(sent[0], "🌤️ Checking weather...");
    assert!(sent[1].starts_with("✅ Weather Safe: Clear"));
    assert!(sent.contains(&format!("🤖 AI Co-Pilot: {}", SAFE)));
    assert!(sent.contains(&"✅ AI Clearance Received. Dispatching Drone...".to_string()));
    assert!(sent.contains(&"📷 Ready. Show manifest.".to_string()));
    // Nothing was scanned, so the vehicle holds after the climb.
    assert!(sent.contains(&"❌ Manifest scan failed.".to_string()));
    assert_eq!(
        sent.last().map(String::as_str),
        Some("Holding position. Send 'stop' to return to launch.")
    );
    assert!(!h.supervisor.is_busy());
    Ok(())
}

#[tokio::test]
async fn out_of_range_stop_rejects_before_any_delivery_goto() -> Result<()> {
    let manifest = "-35.36,149.16,20;-35.40,149.20,20";
    let h = harness(weather("Clear", 3.0), SAFE, Some(manifest), 50.0);

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    mission.await?;

    let targets = h.sim.goto_targets();
    assert_eq!(targets.len(), 3, "pickup, scan descent, climb: {targets:?}");
    for stop in [(-35.36, 149.16), (-35.40, 149.20)] {
        assert!(!targets.iter().any(|t| (t.lat, t.lon) == stop));
    }

    let sent = h.notifier.sent();
    assert!(sent
        .iter()
        .any(|m| m.starts_with("⛔ Mission REJECTED. Stop #2 is too far (")));
    assert!(!sent.iter().any(|m| m.starts_with("✅ Mission Accepted")));
    Ok(())
}

#[tokio::test]
async fn stop_during_transit_halts_delivery_commands() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, Some("-35.366,149.168,20"), 1.0);

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    wait_for_phase(&h.supervisor, FlightPhase::EnrouteStop(0)).await;

    let before = h.sim.commands().len();
    assert!(h.supervisor.handle_command("  STOP ").await.is_none());
    assert!(h.supervisor.cancellation().is_raised());
    mission.await?;

    let commands = h.sim.commands();
    assert_eq!(commands.len(), before + 1);
    assert_eq!(
        commands.last(),
        Some(&VehicleCommand::SetMode(FlightMode::Rtl))
    );
    assert_eq!(h.supervisor.phase(), FlightPhase::Aborted);

    let sent = h.notifier.sent();
    assert!(sent.contains(
        &"🚨 EMERGENCY STOP RECEIVED! Aborting Mission & Returning to Launch (RTL).".to_string()
    ));
    assert!(sent.contains(&"🚨 Mission aborted: emergency stop".to_string()));
    Ok(())
}

#[tokio::test]
async fn stop_while_waiting_for_manifest_frees_the_supervisor() -> Result<()> {
    let scanner = Arc::new(SlowScanner(Duration::from_secs(30)));
    let h = harness_with_scanner(weather("Clear", 3.0), SAFE, scanner, 50.0);

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    let show_manifest = "📷 Ready. Show manifest.".to_string();
    timeout(Duration::from_secs(10), async {
        while !h.notifier.sent().contains(&show_manifest) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await?;

    h.supervisor.handle_command("stop").await;
    timeout(Duration::from_millis(500), mission).await??;
    assert!(!h.supervisor.is_busy());
    assert_eq!(h.supervisor.phase(), FlightPhase::Aborted);
    assert!(h
        .notifier
        .sent()
        .contains(&"🚨 Mission aborted: emergency stop".to_string()));

    let next = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("a new mission should be accepted");
    h.supervisor.handle_command("stop").await;
    timeout(Duration::from_secs(5), next).await??;
    Ok(())
}

#[tokio::test]
async fn bad_weather_issues_no_vehicle_commands() -> Result<()> {
    let h = harness(weather("Rain", 2.0), SAFE, None, 50.0);

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    mission.await?;

    assert!(h.sim.commands().is_empty());
    let sent = h.notifier.sent();
    assert_eq!(
        sent.last().map(String::as_str),
        Some("⛔ Mission Rejected due to Weather.")
    );
    assert!(!sent.iter().any(|m| m.starts_with("🤖")));
    Ok(())
}

#[tokio::test]
async fn unsafe_advisory_issues_no_vehicle_commands() -> Result<()> {
    let h = harness(
        weather("Clear", 3.0),
        "VERDICT: UNSAFE | REASON: Battery too low for round trip.",
        None,
        50.0,
    );

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    mission.await?;

    assert!(h.sim.commands().is_empty());
    assert_eq!(
        h.notifier.sent().last().map(String::as_str),
        Some("⛔ Mission ABORTED by AI Safety Officer.")
    );
    Ok(())
}

#[tokio::test]
async fn help_and_bad_input_are_answered_without_flying() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, None, 50.0);

    assert!(h.supervisor.handle_command("/help").await.is_none());
    assert!(h.supervisor.handle_command("hello drone").await.is_none());
    assert!(h.supervisor.handle_command("91.0, 10.0").await.is_none());

    let sent = h.notifier.sent();
    assert_eq!(sent[0], USAGE);
    assert!(sent[1].starts_with("❌ Invalid coordinates"));
    assert!(sent[2].starts_with("❌ Coordinates out of range"));
    assert!(h.sim.commands().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_pickup_is_refused_while_flying() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, None, 1.0);
    h.sim.set_holding(true)?;

    let mission = h
        .supervisor
        .handle_command("-35.363,149.165")
        .await
        .expect("mission should start");
    wait_for_phase(&h.supervisor, FlightPhase::Takeoff).await;
    assert!(h.supervisor.is_busy());

    assert!(h.supervisor.handle_command("-35.364,149.166").await.is_none());
    assert!(h
        .notifier
        .sent()
        .contains(&"⏳ Mission already in progress. Send 'stop' to abort.".to_string()));

    h.supervisor.handle_command("stop").await;
    mission.await?;
    assert!(!h.supervisor.is_busy());
    Ok(())
}

#[tokio::test]
async fn status_reports_idle_vehicle() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, None, 50.0);

    let status = serde_json::to_value(h.supervisor.status()?)?;
    assert_eq!(status["vehicle_id"], "test-drone");
    assert_eq!(status["phase"]["phase"], "IDLE");
    assert_eq!(status["mode"], "STABILIZE");
    assert_eq!(status["battery_percent"], 100.0);
    assert_eq!(status["armed"], false);
    Ok(())
}

#[tokio::test]
async fn listener_routes_commands_until_shutdown() -> Result<()> {
    let h = harness(weather("Clear", 3.0), SAFE, None, 50.0);
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown) = broadcast::channel(1);

    let listener = tokio::spawn(run_listener(h.supervisor.clone(), commands, shutdown));
    commands_tx.send("help".to_string())?;

    timeout(Duration::from_secs(5), async {
        while h.notifier.sent().is_empty() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await?;
    assert_eq!(h.notifier.sent(), vec![USAGE.to_string()]);

    shutdown_tx.send(())?;
    timeout(Duration::from_secs(5), listener).await??;
    Ok(())
}
