//! Job feed database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{FeedSnapshot, Job};

/// One captured feed document.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FarmSnapshotDbModel {
    pub id: i64,
    /// JSON document `{"data": {"jobs": [...]}}`
    pub payload: String,
    /// Unix epoch milliseconds
    pub captured_at: i64,
}

impl FarmSnapshotDbModel {
    pub fn into_snapshot(self) -> Result<FeedSnapshot> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        Ok(FeedSnapshot {
            id: self.id,
            captured_at: ms_to_datetime(self.captured_at),
            jobs: FeedSnapshot::jobs_from_payload(&payload),
        })
    }
}

/// Last known document of a job, used for digest queries.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FarmJobDbModel {
    pub name: String,
    pub user: String,
    /// Unix epoch seconds
    pub start_time: i64,
    /// Unix epoch seconds
    pub stop_time: i64,
    /// Feed state code ("0" running, "1" finished)
    pub state: String,
    /// JSON job document
    pub payload: String,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

impl FarmJobDbModel {
    pub fn from_job(job: &Job, seen_at: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            name: job.name.clone(),
            user: job.user.clone(),
            start_time: job.start_time,
            stop_time: job.stop_time,
            state: job.state.code().to_string(),
            payload: serde_json::to_string(job)?,
            updated_at: datetime_to_ms(seen_at),
        })
    }

    pub fn into_job(self) -> Result<Job> {
        let value: serde_json::Value = serde_json::from_str(&self.payload)?;
        Job::from_value(&value)
    }
}
