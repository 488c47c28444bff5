//! Shared data model for the Insyd notification client.
//!
//! Everything in here mirrors the backend's wire contract: notification
//! records as delivered by the list endpoint and the push channel, per-user
//! delivery preferences, and the event-submission body.

pub mod channels;
pub mod error;
pub mod event;
pub mod notification;
pub mod preferences;
pub mod types;

pub use error::CoreError;
pub use event::{demo_events, EventSubmission, SubmittedEvent};
pub use notification::{Notification, NotificationType};
pub use preferences::{DigestCadence, Preferences};
