//! Pending message outbox.
//!
//! Merges and the bookkeeping around a send share one async lock; the send
//! itself runs unlocked. After a send only the delivered entries are removed,
//! so a job merged in the meantime stays pending for the next drain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::channels::{ChannelRegistry, OutboundMessage};
use super::message::{MessageEntry, MessageKey, PendingMessage};
use crate::Result;
use crate::database::repositories::PendingMessageRepository;

/// Outcome of one drain over the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Messages whose delivery kind has no registered channel.
    pub unroutable: usize,
}

pub struct Outbox {
    messages: Arc<dyn PendingMessageRepository>,
    service: String,
    lock: Mutex<()>,
}

impl Outbox {
    pub fn new(messages: Arc<dyn PendingMessageRepository>, service: impl Into<String>) -> Self {
        Self {
            messages,
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    /// Fold a job reference into the pending message for `key`, creating the
    /// message when none is pending.
    pub async fn merge_or_create(
        &self,
        key: MessageKey,
        entry: MessageEntry,
        now: DateTime<Utc>,
    ) -> Result<PendingMessage> {
        let _guard = self.lock.lock().await;

        let message = match self.messages.get_message(&key).await? {
            Some(mut existing) => {
                existing.push(entry);
                debug!(
                    recipient = %key.recipient,
                    rule_type = %key.rule_type,
                    entries = existing.entries.len(),
                    "Merged job into pending message"
                );
                existing
            }
            None => PendingMessage::new(key, self.service.clone(), entry, now),
        };

        self.messages.save_message(&message).await?;
        Ok(message)
    }

    /// Hand every pending message to its channel and drop what was delivered.
    pub async fn deliver_pending(&self, channels: &ChannelRegistry) -> Result<DeliveryReport> {
        let pending = {
            let _guard = self.lock.lock().await;
            self.messages.list_messages().await?
        };
        let mut report = DeliveryReport::default();

        for message in pending {
            let Some(channel) = channels.get(message.key.delivery) else {
                warn!(
                    delivery = %message.key.delivery,
                    recipient = %message.key.recipient,
                    "No channel registered for pending message"
                );
                report.unroutable += 1;
                continue;
            };

            let outbound = OutboundMessage {
                service: message.service.clone(),
                text: message.render(),
                blocks: None,
                user: message.key.recipient.clone(),
            };

            if let Err(e) = channel.send(&outbound).await {
                warn!(
                    recipient = %message.key.recipient,
                    rule_type = %message.key.rule_type,
                    error = %e,
                    "Delivery failed, keeping message for retry"
                );
                report.failed += 1;
                continue;
            }

            match self.settle(&message).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        recipient = %message.key.recipient,
                        rule_type = %message.key.rule_type,
                        error = %e,
                        "Delivered message could not be removed"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                delivered = report.delivered,
                failed = report.failed,
                "Outbox drained"
            );
        }
        Ok(report)
    }

    /// Remove the entries of `sent` from its stored message. Entries merged
    /// after the snapshot was taken stay pending under the same key.
    async fn settle(&self, sent: &PendingMessage) -> Result<()> {
        let _guard = self.lock.lock().await;

        let Some(mut stored) = self.messages.get_message(&sent.key).await? else {
            return Ok(());
        };

        if !stored.entries.starts_with(&sent.entries) {
            warn!(
                recipient = %sent.key.recipient,
                rule_type = %sent.key.rule_type,
                "Pending message changed during delivery, leaving it in place"
            );
            return Ok(());
        }

        if stored.entries.len() == sent.entries.len() {
            return self.messages.delete_message(&sent.key).await;
        }

        stored.entries.drain(..sent.entries.len());
        debug!(
            recipient = %sent.key.recipient,
            rule_type = %sent.key.rule_type,
            remaining = stored.entries.len(),
            "Kept entries merged during delivery"
        );
        self.messages.save_message(&stored).await
    }
}
