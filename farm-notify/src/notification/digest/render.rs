//! Digest grouping, narration and block rendering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::facts::{VRI_UNAVAILABLE, allocated_cores, elapsed_secs, format_elapsed, progress};
use crate::domain::Job;

/// Entries listed per section before the rest is summarised.
pub const MAX_SECTION_ENTRIES: usize = 10;

/// Shot prefix used by the farm for jobs not tied to a real shot.
const PLACEHOLDER_SHOT_PREFIX: &str = "none_";

/// Shots of one project, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectShots {
    pub done: Vec<String>,
    pub running: Vec<String>,
}

impl ProjectShots {
    fn len(&self) -> usize {
        self.done.len() + self.running.len()
    }
}

fn shot_of(job: &Job) -> Option<(&str, &str)> {
    let show = job.show.as_deref()?;
    let shot = job.shot.as_deref()?;
    if shot.starts_with(PLACEHOLDER_SHOT_PREFIX) {
        return None;
    }
    Some((show, shot))
}

/// Group jobs by project then shot. A shot with a running job is listed as
/// running only, even when another take of it already finished.
pub fn group_shots(finished: &[Job], running: &[Job]) -> BTreeMap<String, ProjectShots> {
    let mut projects: BTreeMap<String, ProjectShots> = BTreeMap::new();

    for (show, shot) in running.iter().filter_map(shot_of) {
        let entry = projects.entry(show.to_string()).or_default();
        if !entry.running.iter().any(|s| s == shot) {
            entry.running.push(shot.to_string());
        }
    }

    for (show, shot) in finished.iter().filter_map(shot_of) {
        let entry = projects.entry(show.to_string()).or_default();
        if entry.running.iter().any(|s| s == shot) || entry.done.iter().any(|s| s == shot) {
            continue;
        }
        entry.done.push(shot.to_string());
    }

    projects
}

/// `a`, `a and b`, `a, b, and c`.
pub fn oxford_join(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn is_are(n: usize) -> &'static str {
    if n == 1 { "is" } else { "are" }
}

/// Shot narration lines. Empty when no job carries a usable shot.
pub fn narrate(projects: &BTreeMap<String, ProjectShots>) -> Vec<String> {
    let total: usize = projects.values().map(ProjectShots::len).sum();
    match total {
        0 => return Vec::new(),
        1 => {
            let all_done = projects.values().all(|p| p.running.is_empty());
            let line = if all_done {
                "All shots are done."
            } else {
                "All shots are still running."
            };
            return vec![line.to_string()];
        }
        _ => {}
    }

    projects
        .iter()
        .filter(|(_, shots)| shots.len() > 0)
        .map(|(show, shots)| {
            let mut parts = Vec::with_capacity(2);
            if !shots.done.is_empty() {
                if shots.running.is_empty() && shots.done.len() > 1 {
                    parts.push(format!("all {} shots are done", shots.done.len()));
                } else {
                    parts.push(format!(
                        "{} {} done",
                        oxford_join(&shots.done),
                        is_are(shots.done.len())
                    ));
                }
            }
            if !shots.running.is_empty() {
                parts.push(format!(
                    "{} {} still running",
                    oxford_join(&shots.running),
                    is_are(shots.running.len())
                ));
            }
            format!("*{}*: {}.", show, parts.join(", "))
        })
        .collect()
}

/// Opening sentence of a digest with at least one render.
pub fn intro(cutoff_label: &str, finished: usize, running: usize) -> String {
    match (finished, running) {
        (0, 0) => no_renders(cutoff_label),
        (1, 0) => format!("Since {}, your render finished.", cutoff_label),
        (f, 0) => format!("Since {}, all {} of your renders finished.", cutoff_label, f),
        (0, 1) => format!("Since {}, your render is still running.", cutoff_label),
        (0, r) => format!(
            "Since {}, all {} of your renders are still running.",
            cutoff_label, r
        ),
        (f, r) => format!(
            "Since {}, you rendered {} jobs: {} finished and {} {} still running.",
            cutoff_label,
            f + r,
            f,
            r,
            is_are(r)
        ),
    }
}

fn no_renders(cutoff_label: &str) -> String {
    format!("Since {}, you have no renders on the farm.", cutoff_label)
}

pub fn finished_header(count: usize, other_present: bool) -> String {
    match (other_present, count) {
        (true, 1) => "*One render finished:*".to_string(),
        (true, n) => format!("*{} renders finished:*", n),
        (false, 1) => "*Here is your finished render:*".to_string(),
        (false, _) => "*Here are your finished renders:*".to_string(),
    }
}

pub fn running_header(count: usize, other_present: bool) -> String {
    match (other_present, count) {
        (true, 1) => "*One render still running:*".to_string(),
        (true, n) => format!("*{} renders still running:*", n),
        (false, 1) => "*Here is your running render:*".to_string(),
        (false, _) => "*Here are your running renders:*".to_string(),
    }
}

fn shot_label(job: &Job) -> String {
    match (&job.show, &job.shot) {
        (Some(show), Some(shot)) => format!(" ({}/{})", show, shot),
        _ => String::new(),
    }
}

pub fn finished_entry(job: &Job, vri: &str) -> String {
    format!(
        "`{}`{} took {} | VRI: {}",
        job.name,
        shot_label(job),
        format_elapsed(job.stop_time - job.start_time),
        vri
    )
}

/// Whole core counts print bare, fractional ones with one decimal.
fn format_cores(cores: f64) -> String {
    let text = format!("{:.1}", cores);
    match text.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => text,
    }
}

pub fn running_entry(job: &Job, now: DateTime<Utc>) -> String {
    let pct = progress(job).map_or_else(|| "?".to_string(), |p| format!("{:.0}", p));
    format!(
        "`{}`{} is {}% done on {} cores after {}",
        job.name,
        shot_label(job),
        pct,
        format_cores(allocated_cores(job)),
        format_elapsed(elapsed_secs(job, now))
    )
}

fn section(text: String) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text }
    })
}

fn context(text: String) -> Value {
    json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": text }]
    })
}

fn push_section(blocks: &mut Vec<Value>, header: String, entries: Vec<String>, total: usize) {
    blocks.push(section(format!("{}\n{}", header, entries.join("\n"))));
    if total > MAX_SECTION_ENTRIES {
        blocks.push(context(format!("+{} more", total - MAX_SECTION_ENTRIES)));
    }
}

/// Everything needed to render one recipient's digest.
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    pub cutoff_label: &'a str,
    pub finished: &'a [Job],
    /// Render metadata for the leading finished jobs, index aligned.
    pub finished_vri: &'a [String],
    pub running: &'a [Job],
    pub now: DateTime<Utc>,
}

/// A rendered digest: a plain-text fallback plus rich blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub text: String,
    pub blocks: Vec<Value>,
}

pub fn render_digest(input: DigestInput<'_>) -> Digest {
    let (f, r) = (input.finished.len(), input.running.len());

    if f == 0 && r == 0 {
        let text = no_renders(input.cutoff_label);
        return Digest {
            blocks: vec![section(text.clone())],
            text,
        };
    }

    let opening = intro(input.cutoff_label, f, r);
    // Shots are only narrated when both sections are present.
    let narration = if f > 0 && r > 0 {
        narrate(&group_shots(input.finished, input.running))
    } else {
        Vec::new()
    };
    let mut blocks = Vec::new();

    if narration.is_empty() {
        blocks.push(section(opening.clone()));
    } else {
        blocks.push(section(format!("{}\n{}", opening, narration.join("\n"))));
    }

    if f > 0 {
        let entries = input
            .finished
            .iter()
            .take(MAX_SECTION_ENTRIES)
            .enumerate()
            .map(|(i, job)| {
                let vri = input
                    .finished_vri
                    .get(i)
                    .map_or(VRI_UNAVAILABLE, String::as_str);
                finished_entry(job, vri)
            })
            .collect();
        push_section(&mut blocks, finished_header(f, r > 0), entries, f);
    }

    if r > 0 {
        let entries = input
            .running
            .iter()
            .take(MAX_SECTION_ENTRIES)
            .map(|job| running_entry(job, input.now))
            .collect();
        push_section(&mut blocks, running_header(r, f > 0), entries, r);
    }

    Digest {
        text: opening,
        blocks,
    }
}
