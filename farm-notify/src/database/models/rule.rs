//! Notification rule database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{Delivery, Rule, RuleFilters, RuleType};
use crate::{Error, Result};

/// Notification rule database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationRuleDbModel {
    pub id: String,
    /// render_submitted, render_failing, render_finished, farm_summary
    pub notified_for: String,
    /// JSON array of glob patterns
    pub targets: String,
    /// JSON array of user ids; empty means any user
    pub filter_users: String,
    pub user: String,
    pub delivery: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

impl NotificationRuleDbModel {
    pub fn from_rule(rule: &Rule) -> Result<Self> {
        Ok(Self {
            id: rule.id.clone(),
            notified_for: rule.notified_for.as_str().to_string(),
            targets: serde_json::to_string(&rule.targets)?,
            filter_users: serde_json::to_string(&rule.filters.users)?,
            user: rule.user.clone(),
            delivery: rule.delivery.as_str().to_string(),
            created_at: crate::database::time::now_ms(),
        })
    }

    pub fn into_rule(self) -> Result<Rule> {
        let notified_for = self.notified_for.parse::<RuleType>().map_err(|_| {
            Error::validation(format!(
                "rule {} has unknown type '{}'",
                self.id, self.notified_for
            ))
        })?;
        let delivery = self.delivery.parse::<Delivery>().map_err(|_| {
            Error::validation(format!(
                "rule {} has unknown delivery '{}'",
                self.id, self.delivery
            ))
        })?;

        Ok(Rule {
            targets: serde_json::from_str(&self.targets)?,
            filters: RuleFilters {
                users: serde_json::from_str(&self.filter_users)?,
            },
            id: self.id,
            notified_for,
            user: self.user,
            delivery,
        })
    }
}
