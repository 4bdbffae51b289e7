//! Notification engine.
//!
//! Lifecycle events are folded into pending messages by the [`EventProcessor`],
//! the [`Outbox`] drains them to delivery channels, and the
//! [`DigestCompiler`] builds the daily farm summary.

pub mod channels;
pub mod digest;
pub mod message;
pub mod outbox;
pub mod processor;

pub use channels::{ChannelRegistry, DeliveryChannel, OutboundMessage, SlackChannel, SlackConfig};
pub use digest::{DigestCompiler, DigestReport, DigestSchedule, FsMetadataSource, MetadataSource};
pub use message::{MessageEntry, MessageKey, PendingMessage};
pub use outbox::{DeliveryReport, Outbox};
pub use processor::{EventProcessor, LifecycleEvent, StalenessWindows};
