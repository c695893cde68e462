use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Source of raw manifest strings decoded by the onboard code scanner.
#[async_trait]
pub trait ManifestScanner: Send + Sync {
    /// `None` when nothing was decoded.
    async fn scan(&self) -> Result<Option<String>>;
}

/// Takes the next manifest the scanner publishes after the scan is requested.
pub struct TopicScanner {
    manifests: Mutex<mpsc::Receiver<String>>,
    timeout: Duration,
}

impl TopicScanner {
    pub fn new(manifests: mpsc::Receiver<String>, timeout: Duration) -> Self {
        Self {
            manifests: Mutex::new(manifests),
            timeout,
        }
    }
}

#[async_trait]
impl ManifestScanner for TopicScanner {
    async fn scan(&self) -> Result<Option<String>> {
        let mut manifests = self.manifests.lock().await;

        // Anything queued before the request belongs to an earlier pickup.
        while let Ok(stale) = manifests.try_recv() {
            debug!("Discarding stale manifest: {}", stale);
        }

        info!("Waiting up to {:?} for manifest scan", self.timeout);
        match timeout(self.timeout, manifests.recv()).await {
            Ok(Some(data)) => {
                info!("Manifest received: {}", data);
                Ok(Some(data))
            }
            Ok(None) => Err(anyhow!("Manifest channel closed")),
            Err(_) => Ok(None),
        }
    }
}
