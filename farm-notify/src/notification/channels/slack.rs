//! Slack bot delivery channel.
//!
//! Messages are posted to the bot's HTTP API which resolves the recipient id
//! to a Slack user and sends them a direct message.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DeliveryChannel, OutboundMessage};
use crate::Result;
use crate::domain::Delivery;
use crate::utils::http_client::build_client;

/// Slack bot channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Base URL of the bot API, e.g. `http://slackbot:8081`.
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".to_string(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Slack bot notification channel.
pub struct SlackChannel {
    config: SlackConfig,
    client: Client,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, client })
    }

    /// Endpoint for an API method.
    fn endpoint(&self, method: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), method)
    }
}

#[async_trait]
impl DeliveryChannel for SlackChannel {
    fn delivery(&self) -> Delivery {
        Delivery::Slack
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("send_slack_message"))
            .json(message)
            .send()
            .await
            .map_err(|e| crate::Error::delivery("slack", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(user = %message.user, "Slack bot rejected message: {} - {}", status, body);
            return Err(crate::Error::delivery(
                "slack",
                format!("{} - {}", status, body),
            ));
        }

        debug!(user = %message.user, service = %message.service, "Slack message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let channel = SlackChannel::new(SlackConfig {
            base_url: "http://slackbot:8081/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            channel.endpoint("send_slack_message"),
            "http://slackbot:8081/api/send_slack_message"
        );
    }

    #[test]
    fn test_payload_omits_absent_blocks() {
        let message = OutboundMessage {
            service: "cue".to_string(),
            text: "*Farm job failing*\n`a` by you".to_string(),
            blocks: None,
            user: "sam".to_string(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"service": "cue", "text": "*Farm job failing*\n`a` by you", "user": "sam"})
        );
    }

    #[tokio::test]
    async fn test_unreachable_bot_is_delivery_error() {
        let channel = SlackChannel::new(SlackConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
        })
        .unwrap();
        let message = OutboundMessage {
            service: "cue".to_string(),
            text: "hi".to_string(),
            blocks: None,
            user: "sam".to_string(),
        };
        assert!(matches!(
            channel.send(&message).await,
            Err(crate::Error::Delivery { .. })
        ));
    }
}
