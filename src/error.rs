use thiserror::Error;

/// Why a mission did not run to completion. The `Display` text is what the
/// requester receives.
#[derive(Debug, Error)]
pub enum MissionError {
    /// Malformed coordinates or manifest; nothing was commanded.
    #[error("❌ {0}")]
    Input(String),

    /// A safety stage refused the mission.
    #[error("⛔ {0}")]
    Rejected(String),

    /// Cancellation was raised while the mission was flying.
    #[error("🚨 Mission aborted: {0}")]
    Aborted(String),

    #[error("Error: System fail.\nDebug: {0:#}")]
    Vehicle(#[from] anyhow::Error),
}

impl MissionError {
    pub fn input(msg: impl Into<String>) -> Self {
        MissionError::Input(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        MissionError::Rejected(msg.into())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, MissionError::Aborted(_))
    }
}
