//! Per-job facts shown in a digest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{Job, JobState};
use crate::utils::fs::read_optional_text;

/// Placeholder shown when no render metadata can be found.
pub const VRI_UNAVAILABLE: &str = "unavailable";

/// Format a duration in seconds, dropping leading zero units.
///
/// `5` -> `5s`, `65` -> `1m 5s`, `3605` -> `1h 0m 5s`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Render time of a job: stop minus start once finished, otherwise time
/// spent so far.
pub fn elapsed_secs(job: &Job, now: DateTime<Utc>) -> i64 {
    let end = match job.state {
        JobState::Finished => job.stop_time,
        _ => now.timestamp(),
    };
    (end - job.start_time).max(0)
}

/// Cores currently allocated across all layers.
pub fn allocated_cores(job: &Job) -> f64 {
    job.layers.iter().map(|l| l.current_cores).sum()
}

/// Mean completion over layers. Layers reporting nothing count as done.
///
/// `None` when the job has no layers at all.
pub fn progress(job: &Job) -> Option<f64> {
    if job.layers.is_empty() {
        return None;
    }
    let total: f64 = job
        .layers
        .iter()
        .map(|l| l.percent_completed.unwrap_or(100.0))
        .sum();
    Some(total / job.layers.len() as f64)
}

/// Lookup of the render metadata ("VRI") attached to a job's outputs.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Metadata string, or [`VRI_UNAVAILABLE`].
    async fn render_metadata(&self, job: &Job) -> String;
}

/// Reads a sidecar marker file next to each output.
#[derive(Debug, Clone)]
pub struct FsMetadataSource {
    render_root: String,
    marker_name: String,
}

impl FsMetadataSource {
    pub fn new(render_root: impl Into<String>, marker_name: impl Into<String>) -> Self {
        Self {
            render_root: render_root.into(),
            marker_name: marker_name.into(),
        }
    }

    fn marker_path(&self, output: &str) -> Option<PathBuf> {
        if !output.starts_with(&self.render_root) {
            return None;
        }
        Path::new(output)
            .parent()
            .map(|dir| dir.join(&self.marker_name))
    }
}

#[async_trait]
impl MetadataSource for FsMetadataSource {
    async fn render_metadata(&self, job: &Job) -> String {
        let outputs = job.layers.iter().flat_map(|l| l.output_paths.iter());
        for output in outputs {
            let Some(path) = self.marker_path(output) else {
                continue;
            };
            match read_optional_text(&path).await {
                Ok(Some(text)) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        return text.to_string();
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(job = %job.name, error = %e, "Failed to read render marker"),
            }
        }
        VRI_UNAVAILABLE.to_string()
    }
}
