use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::Notifier;
use crate::config::BrokerConfig;

const INBOUND_CAPACITY: usize = 32;

/// Topic layout under `parcel-pilot/{vehicle_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub command: String,
    pub status: String,
    pub manifest: String,
    pub telemetry: String,
    pub connected: String,
}

impl Topics {
    pub fn new(vehicle_id: &str) -> Self {
        let base = format!("parcel-pilot/{}", vehicle_id);
        Self {
            command: format!("{}/command", base),
            status: format!("{}/status", base),
            manifest: format!("{}/manifest", base),
            telemetry: format!("{}/telemetry", base),
            connected: format!("{}/connected", base),
        }
    }
}

/// Receivers for everything the vehicle subscribes to. Commands are
/// unbounded so an abort is never dropped; manifests keep the oldest
/// `INBOUND_CAPACITY` frames between scans.
pub struct Inbound {
    pub commands: mpsc::UnboundedReceiver<String>,
    pub manifests: mpsc::Receiver<String>,
}

struct Router {
    topics: Topics,
    commands: mpsc::UnboundedSender<String>,
    manifests: mpsc::Sender<String>,
}

impl Router {
    /// Never waits on a receiver: the broker event loop runs this inline, and
    /// a parked event loop would stop `stop` commands from arriving.
    fn dispatch(&self, topic: &str, payload: String) {
        if topic == self.topics.command {
            if self.commands.send(payload).is_err() {
                warn!("No receiver for {}, dropping message", topic);
            }
        } else if topic == self.topics.manifest {
            match self.manifests.try_send(payload) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    debug!("Manifest queue full, dropping {:?}", dropped);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("No receiver for {}, dropping message", topic);
                }
            }
        } else {
            debug!("Unhandled topic: {}", topic);
        }
    }
}

/// MQTT link to the operator: inbound commands and manifests, outbound status.
pub struct MqttChannel {
    name: String,
    config: BrokerConfig,
    topics: Topics,
    client: Option<AsyncClient>,
    running: Arc<AtomicBool>,
}

impl MqttChannel {
    pub fn new(vehicle_id: &str, config: BrokerConfig) -> Self {
        Self {
            name: format!("parcel-pilot-{}", vehicle_id),
            config,
            topics: Topics::new(vehicle_id),
            client: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn client(&self) -> Option<AsyncClient> {
        self.client.clone()
    }

    /// Connects, subscribes, and spawns the event loop. Subscriptions are
    /// renewed on every ConnAck so a broker restart does not lose commands.
    pub async fn connect(&mut self) -> Result<(Inbound, JoinHandle<()>)> {
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.host, self.config.port
        );

        let client_id = format!("{}-{}", self.name, uuid::Uuid::new_v4());
        let mut mqtt_options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(self.config.keep_alive_secs))
            .set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (manifests_tx, manifests) = mpsc::channel(INBOUND_CAPACITY);

        let router = Router {
            topics: self.topics.clone(),
            commands: commands_tx,
            manifests: manifests_tx,
        };
        let subscriber = client.clone();
        let running = self.running.clone();

        let connection_handle = tokio::spawn(async move {
            info!("Starting broker connection event loop");
            while running.load(Ordering::SeqCst) {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("Connected to broker: {:?}", ack.code);
                        for topic in [&router.topics.command, &router.topics.manifest] {
                            if let Err(e) = subscriber.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                                error!("Failed to subscribe to {}: {:?}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        debug!("Subscription confirmed: {:?}", ack);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = String::from_utf8_lossy(&p.payload).to_string();
                        debug!("Received message - Topic: {}, Payload: {:?}", p.topic, payload);
                        router.dispatch(&p.topic, payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Broker connection error: {:?}", e);
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("Broker event loop stopped");
        });

        for attempt in 1..=30 {
            match client.try_publish(self.topics.connected.as_str(), QoS::AtLeastOnce, false, "true") {
                Ok(_) => {
                    info!("Broker link ready after {} attempts", attempt);
                    self.client = Some(client);
                    return Ok((Inbound { commands, manifests }, connection_handle));
                }
                Err(e) => {
                    debug!("Broker not ready, attempt {}/30. Error: {:?}", attempt, e);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }

        connection_handle.abort();
        Err(anyhow::anyhow!(
            "Failed to connect to broker after 30 attempts"
        ))
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(client) = &self.client {
            if let Err(e) = client
                .disconnect()
                .await
                .context("Failed to disconnect from broker")
            {
                error!("{:#}", e);
            }
        }
    }
}

#[async_trait]
impl Notifier for MqttChannel {
    async fn notify(&self, text: &str) -> Result<()> {
        info!("Status: {}", text);
        let client = self.client.as_ref().context("Broker link not connected")?;
        client
            .publish(self.topics.status.as_str(), QoS::AtLeastOnce, false, text)
            .await
            .context("Failed to publish status")?;
        Ok(())
    }
}
