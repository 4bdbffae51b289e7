//! Repository layer for database access.
//!
//! Every store the engine touches sits behind a trait so it can be backed by
//! SQLite in production and by [`MemoryStore`] in tests.

pub mod feed;
pub mod memory;
pub mod notification;
pub mod rule;

pub use feed::*;
pub use memory::*;
pub use notification::*;
pub use rule::*;
