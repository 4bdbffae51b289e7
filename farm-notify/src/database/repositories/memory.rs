//! In-memory implementation of every repository.
//!
//! Used by the engine tests and for dry runs without a database file.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    DigestMarkerRepository, FeedRepository, NotificationStateRepository,
    PendingMessageRepository, RuleRepository,
};
use crate::Result;
use crate::domain::{FeedSnapshot, Job, JobState, Rule, RuleType};
use crate::notification::message::{MessageKey, PendingMessage};

#[derive(Default)]
struct MemoryState {
    rules: Vec<Rule>,
    snapshots: Vec<FeedSnapshot>,
    /// Job history with the time each job was last seen.
    jobs: HashMap<String, (Job, DateTime<Utc>)>,
    notified: HashMap<(RuleType, String), Vec<String>>,
    /// Insertion ordered; at most one entry per key.
    messages: Vec<PendingMessage>,
    digests: HashMap<String, DateTime<Utc>>,
}

/// Process-local store backing all repository traits.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs_in_state_since(&self, user: &str, state: JobState, since: DateTime<Utc>) -> Vec<Job> {
        let guard = self.state.lock();
        let mut jobs: Vec<Job> = guard
            .jobs
            .values()
            .map(|(job, _)| job)
            .filter(|j| j.user == user && j.state == state && j.start_time > since.timestamp())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (a.start_time, &a.name).cmp(&(b.start_time, &b.name)));
        jobs
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.state.lock().rules.clone())
    }

    async fn rules_for(&self, rule_type: RuleType) -> Result<Vec<Rule>> {
        Ok(self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| r.notified_for == rule_type)
            .cloned()
            .collect())
    }

    async fn create_rule(&self, rule: &Rule) -> Result<()> {
        self.state.lock().rules.push(rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        self.state.lock().rules.retain(|r| r.id != id);
        Ok(())
    }
}

#[async_trait]
impl FeedRepository for MemoryStore {
    async fn insert_snapshot(&self, payload: &serde_json::Value) -> Result<i64> {
        let mut guard = self.state.lock();
        let id = guard.snapshots.len() as i64 + 1;
        guard.snapshots.push(FeedSnapshot {
            id,
            captured_at: Utc::now(),
            jobs: FeedSnapshot::jobs_from_payload(payload),
        });
        Ok(id)
    }

    async fn latest_snapshot(&self) -> Result<Option<FeedSnapshot>> {
        Ok(self.state.lock().snapshots.last().cloned())
    }

    async fn record_jobs(&self, jobs: &[Job], seen_at: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.state.lock();
        for job in jobs {
            guard.jobs.insert(job.name.clone(), (job.clone(), seen_at));
        }
        let before = guard.jobs.len();
        guard
            .jobs
            .retain(|_, (job, seen)| job.state != JobState::InProgress || *seen >= seen_at);
        Ok((before - guard.jobs.len()) as u64)
    }

    async fn finished_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self.jobs_in_state_since(user, JobState::Finished, since))
    }

    async fn running_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self.jobs_in_state_since(user, JobState::InProgress, since))
    }
}

#[async_trait]
impl NotificationStateRepository for MemoryStore {
    async fn notified_users(&self, event: RuleType, job_name: &str) -> Result<Option<Vec<String>>> {
        Ok(self
            .state
            .lock()
            .notified
            .get(&(event, job_name.to_string()))
            .cloned())
    }

    async fn record_notified(&self, event: RuleType, job_name: &str, user: &str) -> Result<()> {
        let mut guard = self.state.lock();
        let users = guard
            .notified
            .entry((event, job_name.to_string()))
            .or_default();
        if !users.iter().any(|u| u == user) {
            users.push(user.to_string());
        }
        Ok(())
    }

    async fn clear(&self, event: RuleType, job_name: &str) -> Result<u64> {
        let removed = self
            .state
            .lock()
            .notified
            .remove(&(event, job_name.to_string()));
        Ok(removed.map_or(0, |users| users.len() as u64))
    }
}

#[async_trait]
impl PendingMessageRepository for MemoryStore {
    async fn get_message(&self, key: &MessageKey) -> Result<Option<PendingMessage>> {
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .find(|m| &m.key == key)
            .cloned())
    }

    async fn save_message(&self, message: &PendingMessage) -> Result<()> {
        let mut guard = self.state.lock();
        let messages = &mut guard.messages;
        match messages.iter().position(|m| m.key == message.key) {
            Some(idx) => messages[idx].entries = message.entries.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn list_messages(&self) -> Result<Vec<PendingMessage>> {
        Ok(self.state.lock().messages.clone())
    }

    async fn delete_message(&self, key: &MessageKey) -> Result<()> {
        self.state.lock().messages.retain(|m| &m.key != key);
        Ok(())
    }
}

#[async_trait]
impl DigestMarkerRepository for MemoryStore {
    async fn last_digest(&self, user: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().digests.get(user).copied())
    }

    async fn mark_digest(&self, user: &str, at: DateTime<Utc>) -> Result<()> {
        self.state.lock().digests.insert(user.to_string(), at);
        Ok(())
    }
}
