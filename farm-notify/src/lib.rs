//! farm-notify library crate.
//!
//! Render-farm notification engine: rule matching, per-phase de-duplication,
//! message merging, delivery and the daily digest.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
