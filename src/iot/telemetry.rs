use anyhow::{Context, Result};
use rumqttc::{AsyncClient, QoS};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::supervisor::MissionSupervisor;

/// Periodic `MissionStatus` publisher for ground dashboards.
pub struct TelemetryPublisher {
    client: AsyncClient,
    supervisor: Arc<MissionSupervisor>,
    topic: String,
    interval: Duration,
    shutdown: broadcast::Sender<()>,
}

impl TelemetryPublisher {
    pub fn new(
        client: AsyncClient,
        supervisor: Arc<MissionSupervisor>,
        topic: String,
        interval: Duration,
    ) -> Self {
        info!("Creating telemetry publisher on {}", topic);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            client,
            supervisor,
            topic,
            interval,
            shutdown,
        }
    }

    pub async fn publish_status(&self) -> Result<()> {
        let status = self.supervisor.status()?;
        let payload = serde_json::to_string(&status)?;
        debug!("Publishing telemetry: {}", payload);

        self.client
            .publish(&self.topic, QoS::AtMostOnce, false, payload)
            .await
            .context("Failed to queue telemetry")?;
        Ok(())
    }

    pub async fn run(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = rx.recv() => {
                    info!("Shutting down telemetry publisher");
                    break;
                }
                _ = async {
                    if let Err(e) = self.publish_status().await {
                        error!("Failed to publish telemetry: {:#}", e);
                    }
                    sleep(self.interval).await;
                } => {}
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}
