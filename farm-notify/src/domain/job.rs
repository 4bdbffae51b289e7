//! Farm jobs as reported by the job feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Keys every job document must carry.
const REQUIRED_FIELDS: &[&str] = &["name", "user", "startTime", "stopTime", "state", "deadFrames"];

/// Lifecycle state of a job. The feed encodes it as a string code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    /// `"0"`: not finished yet.
    InProgress,
    /// `"1"`: finished successfully.
    Finished,
    /// Any other code the farm reports.
    Other(String),
}

impl JobState {
    pub fn code(&self) -> &str {
        match self {
            Self::InProgress => "0",
            Self::Finished => "1",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for JobState {
    fn from(code: String) -> Self {
        match code.as_str() {
            "0" => Self::InProgress,
            "1" => Self::Finished,
            _ => Self::Other(code),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.code().to_string()
    }
}

/// One compute layer of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(default)]
    pub output_paths: Vec<String>,
    #[serde(default)]
    pub current_cores: f64,
    #[serde(default)]
    pub percent_completed: Option<f64>,
}

/// A render-farm job. Re-read from the feed on every poll and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub name: String,
    pub user: String,
    /// Unix epoch seconds.
    #[serde(deserialize_with = "epoch_seconds")]
    pub start_time: i64,
    /// Unix epoch seconds; `0` while the job has not stopped.
    #[serde(deserialize_with = "epoch_seconds")]
    pub stop_time: i64,
    pub state: JobState,
    pub dead_frames: u32,
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Project the job renders for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shot: Option<String>,
}

impl Job {
    /// Decode a single job document from a feed snapshot.
    ///
    /// Absent required keys are reported as [`Error::MissingField`] naming the
    /// job (when its name is readable) and the first missing key.
    pub fn from_value(value: &Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");

        if let Some(field) = REQUIRED_FIELDS
            .iter()
            .find(|field| value.get(**field).is_none_or(Value::is_null))
        {
            return Err(Error::missing_field(name, *field));
        }

        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.start_time, 0).unwrap_or_default()
    }

    pub fn stopped_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.stop_time, 0).unwrap_or_default()
    }

    pub fn is_failing(&self) -> bool {
        self.dead_frames > 0
    }
}

/// Accept integer or fractional epoch seconds.
fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
    }

    Ok(match Seconds::deserialize(deserializer)? {
        Seconds::Int(secs) => secs,
        Seconds::Float(secs) => secs.trunc() as i64,
    })
}

/// One capture of the job feed.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub id: i64,
    pub captured_at: DateTime<Utc>,
    /// Raw job documents in feed order.
    pub jobs: Vec<Value>,
}

impl FeedSnapshot {
    /// Extract the job list from a `{"data": {"jobs": [...]}}` document.
    pub fn jobs_from_payload(payload: &Value) -> Vec<Value> {
        payload
            .pointer("/data/jobs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Decode every job, in snapshot order.
    pub fn decoded_jobs(&self) -> impl Iterator<Item = Result<Job>> + '_ {
        self.jobs.iter().map(Job::from_value)
    }
}
