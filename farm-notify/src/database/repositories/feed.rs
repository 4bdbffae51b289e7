//! Job feed repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::Result;
use crate::database::models::{FarmJobDbModel, FarmSnapshotDbModel};
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{FeedSnapshot, Job, JobState};

/// Feed source trait.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Store a raw feed document.
    async fn insert_snapshot(&self, payload: &serde_json::Value) -> Result<i64>;
    /// The most recent snapshot by insertion order.
    async fn latest_snapshot(&self) -> Result<Option<FeedSnapshot>>;
    /// Upsert `jobs` into the job history as seen at `seen_at`, then drop
    /// running jobs that were not part of that sighting. Returns the number
    /// of running jobs dropped.
    async fn record_jobs(&self, jobs: &[Job], seen_at: DateTime<Utc>) -> Result<u64>;
    /// Finished jobs of `user` started after `since`.
    async fn finished_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>>;
    /// Still running jobs of `user` started after `since`.
    async fn running_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>>;
}

/// SQLx implementation of FeedRepository.
pub struct SqlxFeedRepository {
    pool: SqlitePool,
}

impl SqlxFeedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn jobs_in_state_since(
        &self,
        user: &str,
        state: JobState,
        since: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, FarmJobDbModel>(
            r#"
            SELECT * FROM farm_job
            WHERE user = ? AND state = ? AND start_time > ?
            ORDER BY start_time, name
            "#,
        )
        .bind(user)
        .bind(state.code())
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.name.clone();
            match row.into_job() {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job = %name, error = %e, "Skipping undecodable job history row"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl FeedRepository for SqlxFeedRepository {
    async fn insert_snapshot(&self, payload: &serde_json::Value) -> Result<i64> {
        let id = sqlx::query("INSERT INTO farm_snapshot (payload, captured_at) VALUES (?, ?)")
            .bind(serde_json::to_string(payload)?)
            .bind(now_ms())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    async fn latest_snapshot(&self) -> Result<Option<FeedSnapshot>> {
        let row = sqlx::query_as::<_, FarmSnapshotDbModel>(
            "SELECT * FROM farm_snapshot ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(FarmSnapshotDbModel::into_snapshot).transpose()
    }

    async fn record_jobs(&self, jobs: &[Job], seen_at: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for job in jobs {
            let row = FarmJobDbModel::from_job(job, seen_at)?;
            sqlx::query(
                r#"
                INSERT INTO farm_job (name, user, start_time, stop_time, state, payload, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    user = excluded.user,
                    start_time = excluded.start_time,
                    stop_time = excluded.stop_time,
                    state = excluded.state,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.name)
            .bind(&row.user)
            .bind(row.start_time)
            .bind(row.stop_time)
            .bind(&row.state)
            .bind(&row.payload)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        // Running jobs that left the feed never report a final state.
        let dropped = sqlx::query("DELETE FROM farm_job WHERE state = ? AND updated_at < ?")
            .bind(JobState::InProgress.code())
            .bind(datetime_to_ms(seen_at))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        if dropped > 0 {
            debug!(dropped, "Dropped running jobs missing from the feed");
        }
        Ok(dropped)
    }

    async fn finished_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>> {
        self.jobs_in_state_since(user, JobState::Finished, since)
            .await
    }

    async fn running_jobs_since(&self, user: &str, since: DateTime<Utc>) -> Result<Vec<Job>> {
        self.jobs_in_state_since(user, JobState::InProgress, since)
            .await
    }
}
