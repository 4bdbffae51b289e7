//! Scheduler module driving the notification engine.
//!
//! The scheduler owns the poll loop: it feeds every job of the latest feed
//! snapshot through the event processors, runs the digest, and periodically
//! drains the outbox to the delivery channels.

mod service;

pub use service::{Scheduler, SchedulerConfig, TickReport};
