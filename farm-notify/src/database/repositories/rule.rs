//! Notification rule repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use crate::Result;
use crate::database::models::NotificationRuleDbModel;
use crate::domain::{Rule, RuleType};

/// Rule store trait.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<Rule>>;
    /// All rules subscribed to `rule_type`, in creation order.
    async fn rules_for(&self, rule_type: RuleType) -> Result<Vec<Rule>>;
    async fn create_rule(&self, rule: &Rule) -> Result<()>;
    async fn delete_rule(&self, id: &str) -> Result<()>;
}

/// SQLx implementation of RuleRepository.
pub struct SqlxRuleRepository {
    pool: SqlitePool,
}

impl SqlxRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Decode rows, skipping the ones that no longer parse.
fn decode_rules(rows: Vec<NotificationRuleDbModel>) -> Vec<Rule> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match row.into_rule() {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(rule_id = %id, error = %e, "Skipping undecodable notification rule");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl RuleRepository for SqlxRuleRepository {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, NotificationRuleDbModel>(
            "SELECT * FROM notification_rule ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rules(rows))
    }

    async fn rules_for(&self, rule_type: RuleType) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, NotificationRuleDbModel>(
            "SELECT * FROM notification_rule WHERE notified_for = ? ORDER BY created_at, rowid",
        )
        .bind(rule_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_rules(rows))
    }

    async fn create_rule(&self, rule: &Rule) -> Result<()> {
        let row = NotificationRuleDbModel::from_rule(rule)?;
        sqlx::query(
            r#"
            INSERT INTO notification_rule (id, notified_for, targets, filter_users, user, delivery, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.notified_for)
        .bind(&row.targets)
        .bind(&row.filter_users)
        .bind(&row.user)
        .bind(&row.delivery)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM notification_rule WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
