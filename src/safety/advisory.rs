use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::SafetyVerdict;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskRequest {
    pub weather_summary: String,
    pub battery_percent: f64,
    /// Distance to pickup, truncated to whole metres.
    pub distance_m: u64,
}

/// External risk assessor. Returns free text that should carry a
/// `SAFE`/`UNSAFE` verdict token.
#[async_trait]
pub trait RiskAdvisor: Send + Sync {
    async fn assess(&self, request: &RiskRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVerdict {
    Safe,
    Unsafe,
}

/// Only an unambiguous `UNSAFE` counts. An explicit `VERDICT:` token decides
/// when present; otherwise `UNSAFE` must appear without a standalone `SAFE`.
pub fn parse_verdict(text: &str) -> RiskVerdict {
    let upper = text.to_uppercase();

    if let Some((_, rest)) = upper.split_once("VERDICT:") {
        let token = rest
            .trim_start()
            .trim_start_matches(['[', '"', '*'])
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        return match token {
            "UNSAFE" => RiskVerdict::Unsafe,
            _ => RiskVerdict::Safe,
        };
    }

    let mut saw_unsafe = false;
    let mut saw_safe = false;
    for word in upper.split(|c: char| !c.is_ascii_alphabetic()) {
        match word {
            "UNSAFE" => saw_unsafe = true,
            "SAFE" => saw_safe = true,
            _ => {}
        }
    }

    if saw_unsafe && !saw_safe {
        RiskVerdict::Unsafe
    } else {
        RiskVerdict::Safe
    }
}

pub struct AdvisoryStage {
    advisor: Option<Arc<dyn RiskAdvisor>>,
}

impl AdvisoryStage {
    /// `None` disables the stage; it then always passes.
    pub fn new(advisor: Option<Arc<dyn RiskAdvisor>>) -> Self {
        Self { advisor }
    }

    /// Fails open on collaborator error or on any answer that is not UNSAFE.
    pub async fn evaluate(&self, request: &RiskRequest) -> SafetyVerdict {
        let Some(advisor) = &self.advisor else {
            return SafetyVerdict::pass("Advisory disabled.");
        };

        match advisor.assess(request).await {
            Ok(text) => match parse_verdict(&text) {
                RiskVerdict::Unsafe => SafetyVerdict::fail(text),
                RiskVerdict::Safe => SafetyVerdict::pass(text),
            },
            Err(e) => SafetyVerdict::pass_with_warning(format!(
                "VERDICT: SAFE | REASON: Advisor offline, defaulting to manual protocol ({:#})",
                e
            )),
        }
    }
}
