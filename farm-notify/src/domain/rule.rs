//! Notification rules and the rule matcher.

use serde::{Deserialize, Serialize};

use super::job::Job;

/// The event a rule subscribes to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum RuleType {
    #[serde(rename = "render_submitted")]
    #[strum(serialize = "render_submitted")]
    Submitted,
    #[serde(rename = "render_failing")]
    #[strum(serialize = "render_failing")]
    Failing,
    #[serde(rename = "render_finished")]
    #[strum(serialize = "render_finished")]
    Finished,
    #[serde(rename = "farm_summary")]
    #[strum(serialize = "farm_summary")]
    Summary,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Outbound channel a rule's messages are delivered through.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Delivery {
    #[default]
    Slack,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Optional narrowing applied after target matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilters {
    #[serde(default)]
    pub users: Vec<String>,
}

/// A recipient's subscription to one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub notified_for: RuleType,
    /// Shell-style glob patterns matched against job names, in order.
    pub targets: Vec<String>,
    #[serde(default)]
    pub filters: RuleFilters,
    /// Recipient of the notification.
    pub user: String,
    #[serde(default)]
    pub delivery: Delivery,
}

impl Rule {
    pub fn new(notified_for: RuleType, user: impl Into<String>, targets: &[&str]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notified_for,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            filters: RuleFilters::default(),
            user: user.into(),
            delivery: Delivery::Slack,
        }
    }

    /// Restrict the rule to jobs owned by the given users.
    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.filters.users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Whether this rule cares about the given job.
    pub fn is_relevant(&self, job: &Job) -> bool {
        is_relevant(self, job)
    }
}

/// Decide whether `job` is covered by `rule`.
///
/// The job name must match one of the rule targets; when the rule carries a
/// user filter, the job owner must also be listed.
pub fn is_relevant(rule: &Rule, job: &Job) -> bool {
    let matched = rule
        .targets
        .iter()
        .any(|target| glob_matches(target, &job.name));
    if !matched {
        return false;
    }

    rule.filters.users.is_empty() || rule.filters.users.iter().any(|u| u == &job.user)
}

/// Case-sensitive shell glob match where `*` also crosses `/`.
fn glob_matches(pattern: &str, name: &str) -> bool {
    // `glob` rejects `**` outside a path component; for names it means `*`.
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }

    match glob::Pattern::new(&collapsed) {
        Ok(compiled) => compiled.matches(name),
        Err(_) => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobState;

    fn job(name: &str, user: &str) -> Job {
        Job {
            name: name.to_string(),
            user: user.to_string(),
            start_time: 0,
            stop_time: 0,
            state: JobState::InProgress,
            dead_frames: 0,
            layers: Vec::new(),
            show: None,
            shot: None,
        }
    }

    #[test]
    fn test_star_matches_suffix() {
        let rule = Rule::new(RuleType::Submitted, "sam", &["shot01_*"]);
        assert!(rule.is_relevant(&job("shot01_comp", "sam")));
        assert!(!rule.is_relevant(&job("shot02_comp", "sam")));
    }

    #[test]
    fn test_question_mark_and_class() {
        let rule = Rule::new(RuleType::Submitted, "sam", &["shot0?_[cl]*"]);
        assert!(rule.is_relevant(&job("shot05_light", "kim")));
        assert!(rule.is_relevant(&job("shot07_comp", "kim")));
        assert!(!rule.is_relevant(&job("shot07_fx", "kim")));
        assert!(!rule.is_relevant(&job("shot10_comp", "kim")));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let rule = Rule::new(RuleType::Finished, "sam", &["SHOT*"]);
        assert!(!rule.is_relevant(&job("shot01_comp", "sam")));
    }

    #[test]
    fn test_any_target_matches() {
        let rule = Rule::new(RuleType::Failing, "sam", &["nope_*", "*_comp"]);
        assert!(rule.is_relevant(&job("shot01_comp", "sam")));
    }

    #[test]
    fn test_no_targets_never_matches() {
        let rule = Rule::new(RuleType::Failing, "sam", &[]);
        assert!(!rule.is_relevant(&job("shot01_comp", "sam")));
    }

    #[test]
    fn test_user_filter() {
        let rule = Rule::new(RuleType::Finished, "lead", &["*"]).with_users(&["sam", "kim"]);
        assert!(rule.is_relevant(&job("a", "kim")));
        assert!(!rule.is_relevant(&job("a", "alex")));
    }

    #[test]
    fn test_star_crosses_separator_and_double_star() {
        let rule = Rule::new(RuleType::Submitted, "sam", &["show/**_comp"]);
        assert!(rule.is_relevant(&job("show/sq010/sh010_comp", "sam")));
    }

    #[test]
    fn test_invalid_pattern_falls_back_to_literal() {
        let rule = Rule::new(RuleType::Submitted, "sam", &["shot[01"]);
        assert!(rule.is_relevant(&job("shot[01", "sam")));
        assert!(!rule.is_relevant(&job("shot0", "sam")));
    }

    #[test]
    fn test_rule_type_strings() {
        assert_eq!(RuleType::Submitted.as_str(), "render_submitted");
        assert_eq!(
            "farm_summary".parse::<RuleType>().unwrap(),
            RuleType::Summary
        );
        assert_eq!(Delivery::Slack.to_string(), "slack");
        let json = serde_json::to_string(&RuleType::Failing).unwrap();
        assert_eq!(json, "\"render_failing\"");
    }
}
