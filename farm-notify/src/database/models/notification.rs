//! Pending message and digest marker database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Delivery, RuleType};
use crate::notification::message::{MessageKey, PendingMessage};
use crate::{Error, Result};

/// Pending message database model. Unique on (rule_type, recipient, delivery).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PendingMessageDbModel {
    pub id: String,
    pub rule_type: String,
    pub recipient: String,
    pub delivery: String,
    pub service: String,
    /// JSON array of `{job_name, owner}`
    pub entries: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

impl PendingMessageDbModel {
    pub fn from_message(message: &PendingMessage) -> Result<Self> {
        Ok(Self {
            id: message.id.clone(),
            rule_type: message.key.rule_type.as_str().to_string(),
            recipient: message.key.recipient.clone(),
            delivery: message.key.delivery.as_str().to_string(),
            service: message.service.clone(),
            entries: serde_json::to_string(&message.entries)?,
            created_at: datetime_to_ms(message.created_at),
        })
    }

    pub fn into_message(self) -> Result<PendingMessage> {
        let rule_type = self.rule_type.parse::<RuleType>().map_err(|_| {
            Error::validation(format!("pending message {} has unknown type", self.id))
        })?;
        let delivery = self.delivery.parse::<Delivery>().map_err(|_| {
            Error::validation(format!("pending message {} has unknown delivery", self.id))
        })?;

        Ok(PendingMessage {
            key: MessageKey::new(rule_type, self.recipient, delivery),
            entries: serde_json::from_str(&self.entries)?,
            created_at: ms_to_datetime(self.created_at),
            id: self.id,
            service: self.service,
        })
    }
}

/// Time of the last digest delivered to a user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DigestMarkerDbModel {
    pub user: String,
    /// Unix epoch milliseconds
    pub last_digest_at: i64,
}
