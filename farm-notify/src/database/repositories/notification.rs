//! Notification state, pending message and digest marker repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::database::models::{DigestMarkerDbModel, PendingMessageDbModel};
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::domain::RuleType;
use crate::notification::message::{MessageKey, PendingMessage};

/// Per-phase record of who has been told about which job.
#[async_trait]
pub trait NotificationStateRepository: Send + Sync {
    /// Users already notified for `job_name` in this phase, or `None` when no
    /// state row exists.
    async fn notified_users(&self, event: RuleType, job_name: &str) -> Result<Option<Vec<String>>>;
    /// Add `user` to the job's state, creating it if absent. Adding a user
    /// twice is a no-op.
    async fn record_notified(&self, event: RuleType, job_name: &str, user: &str) -> Result<()>;
    /// Forget every notified user of the job for this phase.
    async fn clear(&self, event: RuleType, job_name: &str) -> Result<u64>;
}

/// Store of pending messages keyed by (event type, recipient, delivery).
#[async_trait]
pub trait PendingMessageRepository: Send + Sync {
    async fn get_message(&self, key: &MessageKey) -> Result<Option<PendingMessage>>;
    /// Insert or replace the message stored under its key.
    async fn save_message(&self, message: &PendingMessage) -> Result<()>;
    /// All decodable pending messages, oldest first.
    async fn list_messages(&self) -> Result<Vec<PendingMessage>>;
    async fn delete_message(&self, key: &MessageKey) -> Result<()>;
}

/// Per-user marker of the last delivered digest.
#[async_trait]
pub trait DigestMarkerRepository: Send + Sync {
    async fn last_digest(&self, user: &str) -> Result<Option<DateTime<Utc>>>;
    async fn mark_digest(&self, user: &str, at: DateTime<Utc>) -> Result<()>;
}

/// SQLx implementation of the notification stores.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStateRepository for SqlxNotificationRepository {
    async fn notified_users(&self, event: RuleType, job_name: &str) -> Result<Option<Vec<String>>> {
        let users: Vec<(String,)> = sqlx::query_as(
            "SELECT user FROM notification_state WHERE event_type = ? AND job_name = ? ORDER BY notified_at, rowid",
        )
        .bind(event.as_str())
        .bind(job_name)
        .fetch_all(&self.pool)
        .await?;

        if users.is_empty() {
            return Ok(None);
        }
        Ok(Some(users.into_iter().map(|(u,)| u).collect()))
    }

    async fn record_notified(&self, event: RuleType, job_name: &str, user: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO notification_state (event_type, job_name, user, notified_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(event.as_str())
        .bind(job_name)
        .bind(user)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, event: RuleType, job_name: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM notification_state WHERE event_type = ? AND job_name = ?")
                .bind(event.as_str())
                .bind(job_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PendingMessageRepository for SqlxNotificationRepository {
    async fn get_message(&self, key: &MessageKey) -> Result<Option<PendingMessage>> {
        let row = sqlx::query_as::<_, PendingMessageDbModel>(
            "SELECT * FROM pending_message WHERE rule_type = ? AND recipient = ? AND delivery = ?",
        )
        .bind(key.rule_type.as_str())
        .bind(&key.recipient)
        .bind(key.delivery.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PendingMessageDbModel::into_message).transpose()
    }

    async fn save_message(&self, message: &PendingMessage) -> Result<()> {
        let row = PendingMessageDbModel::from_message(message)?;
        sqlx::query(
            r#"
            INSERT INTO pending_message (id, rule_type, recipient, delivery, service, entries, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(rule_type, recipient, delivery) DO UPDATE SET
                entries = excluded.entries
            "#,
        )
        .bind(&row.id)
        .bind(&row.rule_type)
        .bind(&row.recipient)
        .bind(&row.delivery)
        .bind(&row.service)
        .bind(&row.entries)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self) -> Result<Vec<PendingMessage>> {
        let rows = sqlx::query_as::<_, PendingMessageDbModel>(
            "SELECT * FROM pending_message ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match row.into_message() {
                Ok(message) => messages.push(message),
                Err(e) => warn!(message_id = %id, error = %e, "Skipping undecodable pending message"),
            }
        }
        Ok(messages)
    }

    async fn delete_message(&self, key: &MessageKey) -> Result<()> {
        sqlx::query(
            "DELETE FROM pending_message WHERE rule_type = ? AND recipient = ? AND delivery = ?",
        )
        .bind(key.rule_type.as_str())
        .bind(&key.recipient)
        .bind(key.delivery.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DigestMarkerRepository for SqlxNotificationRepository {
    async fn last_digest(&self, user: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, DigestMarkerDbModel>(
            "SELECT * FROM digest_marker WHERE user = ?",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ms_to_datetime(r.last_digest_at)))
    }

    async fn mark_digest(&self, user: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digest_marker (user, last_digest_at) VALUES (?, ?)
            ON CONFLICT(user) DO UPDATE SET last_digest_at = excluded.last_digest_at
            "#,
        )
        .bind(user)
        .bind(datetime_to_ms(at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
