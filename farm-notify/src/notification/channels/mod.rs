//! Delivery channels.
//!
//! A channel takes a fully rendered message and hands it to an external chat
//! service. Only the Slack bot API is wired up today.

mod slack;

pub use slack::{SlackChannel, SlackConfig};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::Delivery;

/// Payload accepted by every delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Tag identifying the producing service.
    pub service: String,
    /// Plain text body, also used as the notification fallback.
    pub text: String,
    /// Optional rich content blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<serde_json::Value>>,
    /// Recipient id.
    pub user: String,
}

/// Trait for delivery channels.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// The delivery kind this channel serves.
    fn delivery(&self) -> Delivery;

    /// Send a message. An error leaves the caller's pending state untouched.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Channels by delivery kind.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    channels: HashMap<Delivery, Arc<dyn DeliveryChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, replacing any previous one for the same delivery.
    pub fn register(&mut self, channel: Arc<dyn DeliveryChannel>) {
        self.channels.insert(channel.delivery(), channel);
    }

    pub fn with(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.register(channel);
        self
    }

    pub fn get(&self, delivery: Delivery) -> Option<&Arc<dyn DeliveryChannel>> {
        self.channels.get(&delivery)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
