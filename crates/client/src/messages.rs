//! Push-channel frame types and parser.
//!
//! The backend sends UTF-8 JSON text frames shaped
//! `{"type": "<kind>", "payload": {...}}`. Only `notification.new` is acted
//! on; every other kind is surfaced as [`PushEvent::Ignored`] so new server
//! features never break older clients.

use insyd_core::Notification;
use serde::Deserialize;

/// Discriminator of the only frame kind the client acts on.
pub const KIND_NOTIFICATION_NEW: &str = "notification.new";

/// Raw envelope, before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A parsed inbound frame.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A new notification for the session's user.
    NewNotification(Notification),
    /// A well-formed frame of a kind this client does not handle.
    Ignored { kind: String },
}

/// Why a text frame could not be turned into a [`PushEvent`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is not a JSON object with a string `type`.
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope is a `notification.new` whose payload is not a
    /// notification record.
    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a push-channel text frame.
///
/// Returns `Err` for malformed JSON or a malformed notification payload.
/// Callers should log the error, drop the frame, and keep the transport open.
pub fn parse_frame(text: &str) -> Result<PushEvent, FrameError> {
    let envelope: PushEnvelope = serde_json::from_str(text).map_err(FrameError::Envelope)?;

    if envelope.kind != KIND_NOTIFICATION_NEW {
        return Ok(PushEvent::Ignored {
            kind: envelope.kind,
        });
    }

    serde_json::from_value(envelope.payload)
        .map(PushEvent::NewNotification)
        .map_err(|source| FrameError::Payload {
            kind: envelope.kind,
            source,
        })
}
