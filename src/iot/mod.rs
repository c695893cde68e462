pub mod mqtt;
pub mod scanner;
pub mod telemetry;

use anyhow::Result;
use async_trait::async_trait;

pub use mqtt::{Inbound, MqttChannel, Topics};
pub use scanner::{ManifestScanner, TopicScanner};

/// Outbound operator status channel. Ordering and delivery guarantees belong
/// to the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}
