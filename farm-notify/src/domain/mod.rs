//! Domain model: rules, jobs, and rule matching.

pub mod job;
pub mod rule;

pub use job::{FeedSnapshot, Job, JobState, Layer};
pub use rule::{Delivery, Rule, RuleFilters, RuleType, is_relevant};
