//! Poll loop.
//!
//! Three cooperative tasks share one async task: event processing on the poll
//! interval, a single digest run, and outbox delivery on its own interval.
//! Jobs within a snapshot are processed strictly one after another. Every tick
//! also refreshes the job history the digest reads, and the digest waits for
//! the first tick so it never reports from a stale history.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::NotifierConfig;
use crate::database::repositories::FeedRepository;
use crate::notification::{ChannelRegistry, DigestCompiler, EventProcessor, Outbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub delivery_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            delivery_interval: Duration::from_secs(20),
        }
    }
}

impl From<&NotifierConfig> for SchedulerConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            delivery_interval: config.delivery_interval,
        }
    }
}

/// Outcome of one event-processing tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub snapshot_id: i64,
    pub jobs: usize,
    /// Recipients newly notified across all events.
    pub notified: usize,
    /// Jobs skipped because they failed to decode or process.
    pub failed: usize,
}

pub struct Scheduler {
    feed: Arc<dyn FeedRepository>,
    processor: EventProcessor,
    outbox: Arc<Outbox>,
    digest: DigestCompiler,
    channels: ChannelRegistry,
    config: SchedulerConfig,
    cancellation_token: CancellationToken,
    first_tick: Notify,
}

impl Scheduler {
    pub fn new(
        feed: Arc<dyn FeedRepository>,
        processor: EventProcessor,
        outbox: Arc<Outbox>,
        digest: DigestCompiler,
        channels: ChannelRegistry,
        config: SchedulerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            feed,
            processor,
            outbox,
            digest,
            channels,
            config,
            cancellation_token,
            first_tick: Notify::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Process every job of the latest snapshot.
    ///
    /// Returns `None` when the feed has no snapshot yet.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<Option<TickReport>> {
        let Some(snapshot) = self.feed.latest_snapshot().await? else {
            return Ok(None);
        };

        let mut report = TickReport {
            snapshot_id: snapshot.id,
            jobs: snapshot.jobs.len(),
            ..Default::default()
        };

        let mut jobs = Vec::with_capacity(snapshot.jobs.len());
        for decoded in snapshot.decoded_jobs() {
            match decoded {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(snapshot_id = snapshot.id, error = %e, "Skipping undecodable job");
                    report.failed += 1;
                }
            }
        }

        if let Err(e) = self.feed.record_jobs(&jobs, now).await {
            warn!(snapshot_id = snapshot.id, error = %e, "Failed to record job history");
        }

        for job in &jobs {
            match self.processor.process_job(job, now).await {
                Ok(n) => report.notified += n,
                Err(e) => {
                    warn!(job = %job.name, error = %e, "Failed to process job");
                    report.failed += 1;
                }
            }
        }

        Ok(Some(report))
    }

    /// Run until cancelled. The digest runs once per invocation.
    pub async fn run(&self) -> Result<()> {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            delivery_interval_secs = self.config.delivery_interval.as_secs(),
            channels = self.channels.len(),
            "Starting scheduler"
        );

        tokio::join!(self.event_loop(), self.digest_once(), self.delivery_loop());

        info!("Scheduler stopped");
        Ok(())
    }

    async fn event_loop(&self) {
        loop {
            let started = std::time::Instant::now();
            match self.run_tick(Utc::now()).await {
                Ok(Some(report)) => debug!(
                    snapshot_id = report.snapshot_id,
                    jobs = report.jobs,
                    notified = report.notified,
                    failed = report.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Processed feed snapshot"
                ),
                Ok(None) => error!("No feed snapshot available, skipping tick"),
                Err(e) => error!(error = %e, "Event tick failed"),
            }
            // Stores a permit, so a digest that is not waiting yet still sees it.
            self.first_tick.notify_one();

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("Event loop received cancellation signal");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn digest_once(&self) {
        tokio::select! {
            _ = self.cancellation_token.cancelled() => return,
            _ = self.first_tick.notified() => {}
        }
        let started = std::time::Instant::now();
        if let Err(e) = self.digest.run(Utc::now()).await {
            error!(error = %e, "Digest run failed");
        }
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Digest finished");
    }

    async fn delivery_loop(&self) {
        loop {
            if let Err(e) = self.outbox.deliver_pending(&self.channels).await {
                error!(error = %e, "Outbox delivery failed");
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("Delivery loop received cancellation signal");
                    break;
                }
                _ = tokio::time::sleep(self.config.delivery_interval) => {}
            }
        }
    }
}
