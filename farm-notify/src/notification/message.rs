//! Pending notification messages.
//!
//! A pending message is keyed by (event type, recipient, delivery channel),
//! never by job. Each qualifying job appends a reference entry; the wording of
//! the header is derived from the number of entries when rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Delivery, RuleType};

/// Identity of a pending message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub rule_type: RuleType,
    pub recipient: String,
    pub delivery: Delivery,
}

impl MessageKey {
    pub fn new(rule_type: RuleType, recipient: impl Into<String>, delivery: Delivery) -> Self {
        Self {
            rule_type,
            recipient: recipient.into(),
            delivery,
        }
    }
}

/// A reference to one job inside a pending message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub job_name: String,
    /// Display name of the job owner (`"you"` when the recipient owns it).
    pub owner: String,
}

impl MessageEntry {
    pub fn new(job_name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            owner: owner.into(),
        }
    }

    fn render(&self) -> String {
        format!("`{}` by {}", self.job_name, self.owner)
    }
}

/// An accumulating, not yet delivered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    pub key: MessageKey,
    /// Service tag forwarded to the delivery channel.
    pub service: String,
    /// Job references in arrival order. Entries are only ever appended.
    pub entries: Vec<MessageEntry>,
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(
        key: MessageKey,
        service: impl Into<String>,
        first: MessageEntry,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            service: service.into(),
            entries: vec![first],
            created_at,
        }
    }

    /// Append a job reference. The creation timestamp is left untouched.
    pub fn push(&mut self, entry: MessageEntry) {
        self.entries.push(entry);
    }

    pub fn is_plural(&self) -> bool {
        self.entries.len() >= 2
    }

    /// Header line, e.g. `*Farm job submitted*` or `*Farm jobs submitted*`.
    pub fn header(&self) -> String {
        header_for(self.key.rule_type, self.is_plural())
    }

    /// Full message body: the header followed by one line per entry.
    pub fn render(&self) -> String {
        let mut body = self.header();
        for entry in &self.entries {
            body.push('\n');
            body.push_str(&entry.render());
        }
        body
    }
}

/// Header wording for an event type.
pub fn header_for(rule_type: RuleType, plural: bool) -> String {
    let noun = if plural { "jobs" } else { "job" };
    match rule_type {
        RuleType::Submitted => format!("*Farm {} submitted*", noun),
        RuleType::Failing => format!("*Farm {} failing*", noun),
        RuleType::Finished => format!("*Farm {} finished*", noun),
        RuleType::Summary => "*Farm summary*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted(recipient: &str) -> MessageKey {
        MessageKey::new(RuleType::Submitted, recipient, Delivery::Slack)
    }

    #[test]
    fn test_single_entry_body() {
        let msg = PendingMessage::new(
            submitted("sam"),
            "cue",
            MessageEntry::new("shot01_comp", "you"),
            Utc::now(),
        );
        assert_eq!(msg.render(), "*Farm job submitted*\n`shot01_comp` by you");
    }

    #[test]
    fn test_second_entry_pluralizes() {
        let mut msg = PendingMessage::new(
            submitted("sam"),
            "cue",
            MessageEntry::new("shot01_comp", "you"),
            Utc::now(),
        );
        msg.push(MessageEntry::new("shot02_light", "kim"));
        assert_eq!(
            msg.render(),
            "*Farm jobs submitted*\n`shot01_comp` by you\n`shot02_light` by kim"
        );
    }

    #[test]
    fn test_plural_never_reverts() {
        let created = Utc::now();
        let mut msg = PendingMessage::new(
            MessageKey::new(RuleType::Failing, "sam", Delivery::Slack),
            "cue",
            MessageEntry::new("a", "you"),
            created,
        );
        for name in ["b", "c", "d"] {
            msg.push(MessageEntry::new(name, "you"));
            assert!(msg.render().starts_with("*Farm jobs failing*"));
        }
        assert_eq!(msg.created_at, created);
    }

    #[test]
    fn test_headers_per_event() {
        assert_eq!(header_for(RuleType::Finished, false), "*Farm job finished*");
        assert_eq!(header_for(RuleType::Failing, true), "*Farm jobs failing*");
    }
}
