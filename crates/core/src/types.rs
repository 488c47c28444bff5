/// Opaque user identity issued by the backend.
pub type UserId = String;

/// Opaque notification identifier, stable across reconnects.
pub type NotificationId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
