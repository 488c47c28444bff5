//! Client-side notification engine.
//!
//! Maintains a durable push channel to the notification backend, recovers
//! from drops with bounded exponential backoff, fans delivered notifications
//! out to registered subscribers, and wraps the backend's REST surface.
//! [`feed::NotificationFeed`] ties the pieces together into one ordered,
//! optimistically-updated view per user session.

pub mod api;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod feed;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use api::{DirectoryClient, DirectoryError};
pub use channel::{ChannelError, ChannelSignal, ChannelState, EventChannel};
pub use config::{ClientConfig, ConfigError};
pub use dispatch::{DispatchRegistry, SubscriptionId};
pub use feed::{FeedError, FeedOptions, NotificationFeed};
pub use reconnect::BackoffPolicy;
