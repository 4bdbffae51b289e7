//! Database models for farm-notify.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod feed;
pub mod notification;
pub mod rule;

pub use feed::*;
pub use notification::*;
pub use rule::*;
