//! Integration tests for the farm-notify engine.
//!
//! These run the SQLx repositories against an in-memory SQLite database with
//! the real schema applied.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use farm_notify::database::repositories::{
    DigestMarkerRepository, FeedRepository, NotificationStateRepository,
    PendingMessageRepository, RuleRepository, SqlxFeedRepository, SqlxNotificationRepository,
    SqlxRuleRepository,
};
use farm_notify::database::{DbPool, init_pool_with_size, run_migrations};
use farm_notify::domain::{Delivery, Job, Rule, RuleType};
use farm_notify::notification::{
    ChannelRegistry, DeliveryChannel, DigestCompiler, DigestSchedule, EventProcessor,
    FsMetadataSource, MessageEntry, MessageKey, OutboundMessage, Outbox, StalenessWindows,
};
use farm_notify::scheduler::{Scheduler, SchedulerConfig};
use farm_notify::{Error, Result};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// One connection so every query sees the same in-memory database.
async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<OutboundMessage>>,
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn delivery(&self) -> Delivery {
        Delivery::Slack
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

fn job_doc(name: &str, user: &str, state: &str, start: i64, stop: i64) -> serde_json::Value {
    json!({
        "name": name,
        "user": user,
        "startTime": start,
        "stopTime": stop,
        "state": state,
        "deadFrames": 0,
        "show": "ABC",
        "shot": "sh010",
        "layers": [{"outputPaths": ["/jobs/ABC/sh010/out.exr"], "currentCores": 16}]
    })
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for table in [
            "notification_rule",
            "farm_snapshot",
            "farm_job",
            "notification_state",
            "pending_message",
            "digest_marker",
        ] {
            assert!(names.contains(&table), "{} table missing", table);
        }
    }
}

mod repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_rule_crud() {
        let repo = SqlxRuleRepository::new(setup_test_db().await);
        let rule = Rule::new(RuleType::Failing, "sam", &["shot*"]).with_users(&["kim"]);
        repo.create_rule(&rule).await.unwrap();
        repo.create_rule(&Rule::new(RuleType::Summary, "sam", &["*"]))
            .await
            .unwrap();

        let failing = repo.rules_for(RuleType::Failing).await.unwrap();
        assert_eq!(failing, vec![rule.clone()]);
        assert_eq!(repo.list_rules().await.unwrap().len(), 2);

        repo.delete_rule(&rule.id).await.unwrap();
        assert!(repo.rules_for(RuleType::Failing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_and_job_history() {
        let repo = SqlxFeedRepository::new(setup_test_db().await);
        let now = Utc::now();
        let start = now.timestamp() - 600;

        assert!(repo.latest_snapshot().await.unwrap().is_none());

        repo.insert_snapshot(&json!({"data": {"jobs": [
            job_doc("a", "sam", "0", start, 0),
            job_doc("b", "sam", "1", start, start + 30),
            {"name": "broken"},
        ]}}))
        .await
        .unwrap();
        let first = repo.latest_snapshot().await.unwrap().unwrap();
        let jobs: Vec<Job> = first.decoded_jobs().filter_map(|j| j.ok()).collect();
        assert_eq!(jobs.len(), 2);
        assert_eq!(repo.record_jobs(&jobs, now - Duration::seconds(10)).await.unwrap(), 0);

        let since = now - Duration::hours(1);
        assert_eq!(repo.running_jobs_since("sam", since).await.unwrap().len(), 1);

        let id = repo
            .insert_snapshot(&json!({"data": {"jobs": [
                job_doc("a", "sam", "1", start, start + 90),
            ]}}))
            .await
            .unwrap();
        let latest = repo.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.jobs.len(), 1);

        let jobs: Vec<Job> = latest.decoded_jobs().filter_map(|j| j.ok()).collect();
        repo.record_jobs(&jobs, now).await.unwrap();

        let finished: Vec<String> = repo
            .finished_jobs_since("sam", since)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(finished, vec!["a", "b"]);
        assert!(repo.running_jobs_since("sam", since).await.unwrap().is_empty());
        assert!(repo.finished_jobs_since("kim", since).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_running_job_missing_from_feed_is_dropped() {
        let repo = SqlxFeedRepository::new(setup_test_db().await);
        let now = Utc::now();
        let start = now.timestamp() - 600;
        let running = Job::from_value(&job_doc("a", "sam", "0", start, 0)).unwrap();
        let other = Job::from_value(&job_doc("b", "sam", "0", start, 0)).unwrap();

        repo.record_jobs(&[running, other.clone()], now - Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(repo.record_jobs(&[other], now).await.unwrap(), 1);

        let names: Vec<String> = repo
            .running_jobs_since("sam", now - Duration::hours(1))
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[tokio::test]
    async fn test_notification_state() {
        let repo = SqlxNotificationRepository::new(setup_test_db().await);

        assert_eq!(repo.notified_users(RuleType::Failing, "a").await.unwrap(), None);
        repo.record_notified(RuleType::Failing, "a", "sam").await.unwrap();
        repo.record_notified(RuleType::Failing, "a", "sam").await.unwrap();
        repo.record_notified(RuleType::Failing, "a", "kim").await.unwrap();
        repo.record_notified(RuleType::Finished, "a", "sam").await.unwrap();

        assert_eq!(
            repo.notified_users(RuleType::Failing, "a").await.unwrap(),
            Some(vec!["sam".to_string(), "kim".to_string()])
        );
        assert_eq!(repo.clear(RuleType::Failing, "a").await.unwrap(), 2);
        assert_eq!(repo.notified_users(RuleType::Failing, "a").await.unwrap(), None);
        assert!(repo.notified_users(RuleType::Finished, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_outbox_on_sqlite() {
        let repo = Arc::new(SqlxNotificationRepository::new(setup_test_db().await));
        let outbox = Outbox::new(repo.clone(), "cue");
        let key = MessageKey::new(RuleType::Submitted, "sam", Delivery::Slack);
        let created = Utc::now();

        outbox
            .merge_or_create(key.clone(), MessageEntry::new("shot01_comp", "you"), created)
            .await
            .unwrap();
        outbox
            .merge_or_create(
                key.clone(),
                MessageEntry::new("shot02_light", "kim"),
                created + Duration::seconds(30),
            )
            .await
            .unwrap();

        let stored = repo.get_message(&key).await.unwrap().unwrap();
        assert_eq!(
            stored.render(),
            "*Farm jobs submitted*\n`shot01_comp` by you\n`shot02_light` by kim"
        );
        assert_eq!(stored.created_at.timestamp_millis(), created.timestamp_millis());
        assert_eq!(stored.service, "cue");

        let channel = Arc::new(RecordingChannel::default());
        let report = outbox
            .deliver_pending(&ChannelRegistry::new().with(channel.clone()))
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert!(repo.list_messages().await.unwrap().is_empty());
        assert_eq!(channel.sent.lock()[0].user, "sam");
    }

    #[tokio::test]
    async fn test_undecodable_pending_message_does_not_block_delivery() {
        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let outbox = Outbox::new(repo.clone(), "cue");

        sqlx::query(
            "INSERT INTO pending_message (id, rule_type, recipient, delivery, service, entries, created_at) \
             VALUES ('bad', 'render_exploded', 'kim', 'slack', 'cue', '[]', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        outbox
            .merge_or_create(
                MessageKey::new(RuleType::Finished, "sam", Delivery::Slack),
                MessageEntry::new("shot01_comp", "you"),
                Utc::now(),
            )
            .await
            .unwrap();

        let channel = Arc::new(RecordingChannel::default());
        let report = outbox
            .deliver_pending(&ChannelRegistry::new().with(channel.clone()))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        let sent = channel.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user, "sam");
        assert_eq!(repo.list_messages().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_digest_marker() {
        let repo = SqlxNotificationRepository::new(setup_test_db().await);
        assert_eq!(repo.last_digest("sam").await.unwrap(), None);

        let first = Utc::now() - Duration::days(1);
        let second = Utc::now();
        repo.mark_digest("sam", first).await.unwrap();
        repo.mark_digest("sam", second).await.unwrap();

        let last = repo.last_digest("sam").await.unwrap().unwrap();
        assert_eq!(last.timestamp_millis(), second.timestamp_millis());
    }
}

mod engine_tests {
    use super::*;

    struct Engine {
        pool: DbPool,
        feed: Arc<SqlxFeedRepository>,
        rules: Arc<SqlxRuleRepository>,
        store: Arc<SqlxNotificationRepository>,
        channel: Arc<RecordingChannel>,
        scheduler: Scheduler,
    }

    async fn engine() -> Engine {
        let pool = setup_test_db().await;
        let feed = Arc::new(SqlxFeedRepository::new(pool.clone()));
        let rules = Arc::new(SqlxRuleRepository::new(pool.clone()));
        let store = Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let channel = Arc::new(RecordingChannel::default());
        let channels = ChannelRegistry::new().with(channel.clone());

        let outbox = Arc::new(Outbox::new(store.clone(), "cue"));
        let processor = EventProcessor::new(
            rules.clone(),
            store.clone(),
            outbox.clone(),
            StalenessWindows::default(),
        );
        let digest = DigestCompiler::new(
            feed.clone(),
            rules.clone(),
            store.clone(),
            Arc::new(FsMetadataSource::new("/jobs/", "vri.txt")),
            channels.clone(),
            DigestSchedule::default(),
            "cue",
        );
        let scheduler = Scheduler::new(
            feed.clone(),
            processor,
            outbox,
            digest,
            channels,
            SchedulerConfig::default(),
            CancellationToken::new(),
        );

        Engine {
            pool,
            feed,
            rules,
            store,
            channel,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_through_repeated_ticks() {
        let engine = engine().await;
        engine
            .rules
            .create_rule(&Rule::new(RuleType::Submitted, "lead", &["shot01_*"]))
            .await
            .unwrap();
        engine
            .rules
            .create_rule(&Rule::new(RuleType::Finished, "sam", &["*"]))
            .await
            .unwrap();

        let now = Utc::now();
        let start = now.timestamp() - 60;

        engine
            .feed
            .insert_snapshot(&json!({"data": {"jobs": [job_doc("shot01_comp", "sam", "0", start, 0)]}}))
            .await
            .unwrap();
        let report = engine.scheduler.run_tick(now).await.unwrap().unwrap();
        assert_eq!(report.notified, 1);

        // Same snapshot again: nothing new.
        let report = engine.scheduler.run_tick(now).await.unwrap().unwrap();
        assert_eq!(report.notified, 0);

        engine
            .feed
            .insert_snapshot(&json!({"data": {"jobs": [
                job_doc("shot01_comp", "sam", "1", start, now.timestamp() - 5)
            ]}}))
            .await
            .unwrap();
        let report = engine.scheduler.run_tick(now).await.unwrap().unwrap();
        assert_eq!(report.notified, 1);

        let messages = engine.store.list_messages().await.unwrap();
        let bodies: Vec<(String, String)> = messages
            .iter()
            .map(|m| (m.key.recipient.clone(), m.render()))
            .collect();
        assert_eq!(
            bodies,
            vec![
                (
                    "lead".to_string(),
                    "*Farm job submitted*\n`shot01_comp` by sam".to_string()
                ),
                (
                    "sam".to_string(),
                    "*Farm job finished*\n`shot01_comp` by you".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_fatal() {
        let engine = engine().await;
        assert_eq!(engine.scheduler.run_tick(Utc::now()).await.unwrap(), None);
    }

    fn digest(engine: &Engine) -> DigestCompiler {
        DigestCompiler::new(
            engine.feed.clone(),
            engine.rules.clone(),
            engine.store.clone(),
            Arc::new(FsMetadataSource::new("/jobs/", "vri.txt")),
            ChannelRegistry::new().with(engine.channel.clone()),
            DigestSchedule::default(),
            "cue",
        )
    }

    #[tokio::test]
    async fn test_digest_reads_history_of_externally_written_feed() {
        let engine = engine().await;
        engine
            .rules
            .create_rule(&Rule::new(RuleType::Summary, "sam", &["*"]))
            .await
            .unwrap();

        let now = Utc::now();
        let start = now.timestamp() - 600;
        let payload = json!({"data": {"jobs": [
            job_doc("shot01_comp", "sam", "1", start, start + 65),
        ]}});
        // A feed writer that only appends snapshots.
        sqlx::query("INSERT INTO farm_snapshot (payload, captured_at) VALUES (?, ?)")
            .bind(payload.to_string())
            .bind(now.timestamp_millis())
            .execute(&engine.pool)
            .await
            .unwrap();

        engine.scheduler.run_tick(now).await.unwrap().unwrap();
        let report = digest(&engine).run(now).await.unwrap();
        assert_eq!(report.sent, 1);

        let sent = engine.channel.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.ends_with("your render finished."), "{}", sent[0].text);
        let blocks = sent[0].blocks.as_ref().unwrap();
        let finished = blocks[1].pointer("/text/text").and_then(|v| v.as_str()).unwrap();
        assert!(finished.contains("`shot01_comp` (ABC/sh010) took 1m 5s"));
    }

    #[tokio::test]
    async fn test_digest_without_renders() {
        let engine = engine().await;
        let digest = digest(&engine);
        engine
            .rules
            .create_rule(&Rule::new(RuleType::Summary, "kim", &["*"]))
            .await
            .unwrap();

        let report = digest.run(Utc::now()).await.unwrap();
        assert_eq!(report.sent, 1);

        let sent = engine.channel.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user, "kim");
        assert_eq!(sent[0].blocks.as_ref().map(Vec::len), Some(1));
        assert!(sent[0].text.ends_with("you have no renders on the farm."));
        assert!(engine.store.last_digest("kim").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scheduler_config_from_env_config() {
        let config = farm_notify::config::NotifierConfig::from_lookup(|key| match key {
            "FARM_POLL_INTERVAL_SECS" => Some("3".to_string()),
            _ => None,
        })
        .unwrap();
        let scheduler_config = SchedulerConfig::from(&config);
        assert_eq!(scheduler_config.poll_interval.as_secs(), 3);
        assert_eq!(scheduler_config.delivery_interval.as_secs(), 20);

        let err = farm_notify::config::NotifierConfig::from_lookup(|key| {
            (key == "DELIVERY_INTERVAL_SECS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
