//! Lifecycle event processors.
//!
//! Each poll evaluates every job of the latest snapshot against the rules of
//! the three lifecycle events. Per-phase notification state guards against
//! telling the same recipient twice; leaving a phase clears that state so a
//! later re-entry notifies again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::message::{MessageEntry, MessageKey};
use super::outbox::Outbox;
use crate::Result;
use crate::database::repositories::{NotificationStateRepository, RuleRepository};
use crate::domain::{Job, JobState, RuleType};

/// Default maximum age of a submission worth announcing.
pub const DEFAULT_SUBMITTED_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default maximum age of a completion worth announcing.
pub const DEFAULT_FINISHED_WINDOW: Duration = Duration::from_secs(30);

/// Job lifecycle events that produce per-job notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Submitted,
    Failing,
    Finished,
}

/// Where a job stands with respect to an event's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The event condition holds; evaluate rules.
    Active,
    /// The job left the phase; forget who was notified.
    Left,
    /// Not relevant to this event; do nothing.
    Ignored,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] = [Self::Submitted, Self::Failing, Self::Finished];

    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::Submitted => RuleType::Submitted,
            Self::Failing => RuleType::Failing,
            Self::Finished => RuleType::Finished,
        }
    }

    fn phase(&self, job: &Job) -> Phase {
        match self {
            // Submission is one-shot per job and never reset.
            Self::Submitted => Phase::Active,
            Self::Failing if job.is_failing() => Phase::Active,
            Self::Failing => Phase::Left,
            Self::Finished => match job.state {
                JobState::Finished => Phase::Active,
                JobState::InProgress => Phase::Left,
                JobState::Other(_) => Phase::Ignored,
            },
        }
    }

    /// Reference time and window for the staleness check, if any.
    fn staleness(&self, job: &Job, windows: &StalenessWindows) -> Option<(i64, Duration)> {
        match self {
            Self::Submitted => Some((job.start_time, windows.submitted)),
            Self::Finished => Some((job.stop_time, windows.finished)),
            // A job may stay failing indefinitely.
            Self::Failing => None,
        }
    }
}

/// Maximum event ages per lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessWindows {
    pub submitted: Duration,
    pub finished: Duration,
}

impl Default for StalenessWindows {
    fn default() -> Self {
        Self {
            submitted: DEFAULT_SUBMITTED_WINDOW,
            finished: DEFAULT_FINISHED_WINDOW,
        }
    }
}

/// `true` when `event_ts` is more than `window` away from `now`.
/// An event exactly `window` old is still fresh.
pub fn is_stale(now: DateTime<Utc>, event_ts: i64, window: Duration) -> bool {
    let age = (now.timestamp() - event_ts).unsigned_abs();
    age > window.as_secs()
}

/// Evaluates lifecycle events for single jobs.
pub struct EventProcessor {
    rules: Arc<dyn RuleRepository>,
    state: Arc<dyn NotificationStateRepository>,
    outbox: Arc<Outbox>,
    windows: StalenessWindows,
}

impl EventProcessor {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        state: Arc<dyn NotificationStateRepository>,
        outbox: Arc<Outbox>,
        windows: StalenessWindows,
    ) -> Self {
        Self {
            rules,
            state,
            outbox,
            windows,
        }
    }

    /// Run all lifecycle events for one job, in order.
    ///
    /// Returns the number of recipients notified.
    pub async fn process_job(&self, job: &Job, now: DateTime<Utc>) -> Result<usize> {
        let mut notified = 0;
        for event in LifecycleEvent::ALL {
            notified += self.process(event, job, now).await?;
        }
        Ok(notified)
    }

    /// Evaluate one lifecycle event for one job.
    pub async fn process(&self, event: LifecycleEvent, job: &Job, now: DateTime<Utc>) -> Result<usize> {
        let rule_type = event.rule_type();

        match event.phase(job) {
            Phase::Active => {}
            Phase::Left => {
                let cleared = self.state.clear(rule_type, &job.name).await?;
                if cleared > 0 {
                    debug!(job = %job.name, event = %rule_type, cleared, "Job left phase, state reset");
                }
                return Ok(0);
            }
            Phase::Ignored => return Ok(0),
        }

        let rules = self.rules.rules_for(rule_type).await?;
        let mut already = self
            .state
            .notified_users(rule_type, &job.name)
            .await?
            .unwrap_or_default();
        let mut notified = 0;

        for rule in rules {
            if !rule.is_relevant(job) {
                continue;
            }
            if already.iter().any(|u| u == &rule.user) {
                continue;
            }

            if let Some((event_ts, window)) = event.staleness(job, &self.windows) {
                if is_stale(now, event_ts, window) {
                    info!(
                        rule_id = %rule.id,
                        job = %job.name,
                        event = %rule_type,
                        age_secs = (now.timestamp() - event_ts).abs(),
                        "Event too old, ignoring"
                    );
                    continue;
                }
            }

            let owner = if rule.user == job.user {
                "you".to_string()
            } else {
                job.user.clone()
            };

            self.outbox
                .merge_or_create(
                    MessageKey::new(rule_type, rule.user.clone(), rule.delivery),
                    MessageEntry::new(job.name.clone(), owner),
                    now,
                )
                .await?;
            self.state
                .record_notified(rule_type, &job.name, &rule.user)
                .await?;

            debug!(rule_id = %rule.id, job = %job.name, recipient = %rule.user, event = %rule_type, "Queued notification");
            already.push(rule.user);
            notified += 1;
        }

        Ok(notified)
    }
}
