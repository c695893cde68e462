use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::time::Duration;
use tracing::{debug, info};

use crate::config::AdvisoryConfig;
use crate::safety::{RiskAdvisor, RiskRequest};

/// Risk assessment through an OpenAI-compatible chat-completions endpoint.
pub struct ChatRiskAdvisor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatRiskAdvisor {
    pub fn new(config: &AdvisoryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build advisory HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

pub fn build_prompt(request: &RiskRequest) -> String {
    format!(
        "You are a Drone Safety Officer. Analyze the following flight conditions:\n\
         - Weather: {}\n\
         - Battery Level: {}%\n\
         - Pickup Distance: {} meters\n\
         \n\
         Rules:\n\
         - Battery drains approx 1% every 20m.\n\
         - Winds over 10m/s are dangerous.\n\
         - Rain is prohibited.\n\
         - If battery is too low for the round trip, reject.\n\
         \n\
         Task:\n\
         Decide if the mission is SAFE or UNSAFE.\n\
         Return your answer in this format EXACTLY:\n\
         \"VERDICT: [SAFE/UNSAFE] | REASON: [Short explanation]\"",
        request.weather_summary, request.battery_percent, request.distance_m
    )
}

fn extract_content(body: &JsonValue) -> Result<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .context("Advisory response has no message content")
}

#[async_trait]
impl RiskAdvisor for ChatRiskAdvisor {
    async fn assess(&self, request: &RiskRequest) -> Result<String> {
        info!("Requesting risk assessment");
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": build_prompt(request)}],
            "max_tokens": 60,
            "temperature": 0.2,
        });

        let body: JsonValue = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Advisory request failed")?
            .error_for_status()
            .context("Advisory service returned an error")?
            .json()
            .await
            .context("Advisory response was not JSON")?;
        debug!("Advisory response: {}", body);

        extract_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_flight_conditions() {
        let prompt = build_prompt(&RiskRequest {
            weather_summary: "Clear (clear sky), 21°C, Wind: 3 m/s".to_string(),
            battery_percent: 87.5,
            distance_m: 412,
        });
        assert!(prompt.contains("Weather: Clear (clear sky)"));
        assert!(prompt.contains("Battery Level: 87.5%"));
        assert!(prompt.contains("Pickup Distance: 412 meters"));
        assert!(prompt.contains("VERDICT: [SAFE/UNSAFE]"));
    }

    #[test]
    fn extracts_first_choice() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "  VERDICT: SAFE | REASON: ok \n"}}]
        });
        assert_eq!(extract_content(&body).unwrap(), "VERDICT: SAFE | REASON: ok");
        assert!(extract_content(&json!({"error": "quota"})).is_err());
    }
}
