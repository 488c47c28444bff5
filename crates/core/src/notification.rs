//! Notification records as delivered to a client session.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{NotificationId, Timestamp, UserId};

/// Category of a notification.
///
/// The backend currently emits the three named kinds, but the set is open:
/// any other string is preserved in [`NotificationType::Other`] instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    Social,
    Collaboration,
    System,
    Other(String),
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::Social => "social",
            NotificationType::Collaboration => "collaboration",
            NotificationType::System => "system",
            NotificationType::Other(s) => s,
        }
    }

    /// Whether this is one of the kinds the client has first-class handling for.
    pub fn is_known(&self) -> bool {
        !matches!(self, NotificationType::Other(_))
    }

    /// The named kinds, in display order.
    pub fn known() -> [NotificationType; 3] {
        [
            NotificationType::Social,
            NotificationType::Collaboration,
            NotificationType::System,
        ]
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "social" => NotificationType::Social,
            "collaboration" => NotificationType::Collaboration,
            "system" => NotificationType::System,
            _ => NotificationType::Other(value),
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        match value {
            NotificationType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification addressed to one user.
///
/// Immutable once delivered except for `is_read`, which only ever moves from
/// `false` to `true` on the client (see [`Notification::mark_read`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    /// Opaque structured payload, passed through unexamined.
    #[serde(default)]
    pub data_json: serde_json::Value,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Notification {
    /// Flag the notification as read. Returns `true` if the flag changed.
    pub fn mark_read(&mut self) -> bool {
        let changed = !self.is_read;
        self.is_read = true;
        changed
    }
}
