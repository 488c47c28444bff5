//! Well-known delivery channel names.
//!
//! These are the keys of [`Preferences::channels`](crate::Preferences) and
//! must match the names the backend uses when routing notifications.

/// In-app notification delivered over the push channel and listed in the
/// notification feed.
pub const CHANNEL_IN_APP: &str = "in_app";

/// Notification delivered by email (immediately or as part of a digest).
pub const CHANNEL_EMAIL: &str = "email";

/// Every channel the client knows about, in display order.
pub const KNOWN_CHANNELS: [&str; 2] = [CHANNEL_IN_APP, CHANNEL_EMAIL];
