//! Daily farm digest.
//!
//! For every recipient subscribed to `farm_summary`, collects the jobs they
//! started since the cutoff, renders a narrated summary and hands it to the
//! recipient's delivery channel.

mod facts;
mod render;

pub use facts::{
    FsMetadataSource, MetadataSource, VRI_UNAVAILABLE, allocated_cores, elapsed_secs,
    format_elapsed, progress,
};
pub use render::{
    Digest, DigestInput, MAX_SECTION_ENTRIES, ProjectShots, group_shots, narrate, oxford_join,
    render_digest,
};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Days, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use super::channels::{ChannelRegistry, OutboundMessage};
use crate::database::repositories::{DigestMarkerRepository, FeedRepository, RuleRepository};
use crate::domain::{Rule, RuleType};
use crate::{Error, Result};

const CUTOFF_LABEL_FORMAT: &str = "%a %d %b %H:%M";

/// When the digest looks back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSchedule {
    /// Local time of day the digest is anchored at.
    pub time: NaiveTime,
    /// Calendar days of look-back.
    pub lookback_days: u32,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self {
            time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            lookback_days: 3,
        }
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        // Inside a DST gap; treat the wall clock as UTC.
        .unwrap_or_else(|| naive.and_utc())
}

/// Start of the digest window: `lookback_days` before the local date of
/// `now`, at the schedule's time of day.
pub fn digest_cutoff<Tz: TimeZone>(now: &DateTime<Tz>, schedule: &DigestSchedule) -> DateTime<Utc> {
    let date = now.date_naive() - Days::new(u64::from(schedule.lookback_days));
    resolve_local(&now.timezone(), date.and_time(schedule.time))
}

/// The latest occurrence of the schedule's time of day at or before `now`.
pub fn latest_digest_slot<Tz: TimeZone>(now: &DateTime<Tz>, schedule: &DigestSchedule) -> DateTime<Utc> {
    let today = resolve_local(&now.timezone(), now.date_naive().and_time(schedule.time));
    if today <= now.with_timezone(&Utc) {
        today
    } else {
        let yesterday = now.date_naive() - Days::new(1);
        resolve_local(&now.timezone(), yesterday.and_time(schedule.time))
    }
}

/// Outcome of one digest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub sent: usize,
    /// Recipients already digested for the current slot.
    pub skipped: usize,
    pub failed: usize,
}

pub struct DigestCompiler {
    feed: Arc<dyn FeedRepository>,
    rules: Arc<dyn RuleRepository>,
    markers: Arc<dyn DigestMarkerRepository>,
    metadata: Arc<dyn MetadataSource>,
    channels: ChannelRegistry,
    schedule: DigestSchedule,
    service: String,
}

impl DigestCompiler {
    pub fn new(
        feed: Arc<dyn FeedRepository>,
        rules: Arc<dyn RuleRepository>,
        markers: Arc<dyn DigestMarkerRepository>,
        metadata: Arc<dyn MetadataSource>,
        channels: ChannelRegistry,
        schedule: DigestSchedule,
        service: impl Into<String>,
    ) -> Self {
        Self {
            feed,
            rules,
            markers,
            metadata,
            channels,
            schedule,
            service: service.into(),
        }
    }

    /// Build one recipient's digest message.
    pub async fn compile(
        &self,
        recipient: &str,
        cutoff: DateTime<Utc>,
        cutoff_label: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboundMessage> {
        let finished = self.feed.finished_jobs_since(recipient, cutoff).await?;
        let running = self.feed.running_jobs_since(recipient, cutoff).await?;

        let mut finished_vri = Vec::with_capacity(finished.len().min(MAX_SECTION_ENTRIES));
        for job in finished.iter().take(MAX_SECTION_ENTRIES) {
            finished_vri.push(self.metadata.render_metadata(job).await);
        }

        debug!(
            recipient,
            finished = finished.len(),
            running = running.len(),
            "Compiled digest"
        );

        let digest = render_digest(DigestInput {
            cutoff_label,
            finished: &finished,
            finished_vri: &finished_vri,
            running: &running,
            now,
        });

        Ok(OutboundMessage {
            service: self.service.clone(),
            text: digest.text,
            blocks: Some(digest.blocks),
            user: recipient.to_string(),
        })
    }

    /// Run the digest for every subscribed recipient, in local time.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DigestReport> {
        self.run_at(now.with_timezone(&Local)).await
    }

    /// Run the digest with `now` interpreted in its own time zone.
    pub async fn run_at<Tz>(&self, now: DateTime<Tz>) -> Result<DigestReport>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let cutoff = digest_cutoff(&now, &self.schedule);
        let slot = latest_digest_slot(&now, &self.schedule);
        let label = cutoff
            .with_timezone(&now.timezone())
            .format(CUTOFF_LABEL_FORMAT)
            .to_string();
        let now_utc = now.with_timezone(&Utc);

        let rules = self.rules.rules_for(RuleType::Summary).await?;
        let mut seen = HashSet::new();
        let mut report = DigestReport::default();

        for rule in rules {
            if !seen.insert(rule.user.clone()) {
                continue;
            }
            match self.digest_recipient(&rule, cutoff, slot, &label, now_utc).await {
                Ok(true) => report.sent += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(recipient = %rule.user, error = %e, "Skipping digest for recipient");
                    report.failed += 1;
                }
            }
        }

        info!(
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            cutoff = %label,
            "Digest run complete"
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when the recipient was already digested.
    async fn digest_recipient(
        &self,
        rule: &Rule,
        cutoff: DateTime<Utc>,
        slot: DateTime<Utc>,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(last) = self.markers.last_digest(&rule.user).await? {
            if last >= slot {
                debug!(recipient = %rule.user, last = %last, "Digest already sent for this slot");
                return Ok(false);
            }
        }

        let channel = self
            .channels
            .get(rule.delivery)
            .ok_or_else(|| Error::delivery(rule.delivery.as_str(), "no channel registered"))?;

        let message = self.compile(&rule.user, cutoff, label, now).await?;
        channel.send(&message).await?;
        self.markers.mark_digest(&rule.user, now).await?;
        Ok(true)
    }
}
