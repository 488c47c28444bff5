//! Event submission body for `POST /v1/notifications/events`.
//!
//! The backend turns a submitted event into zero or more notifications.
//! Every submission carries an idempotency key so that a retried request
//! never creates a duplicate notification.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{NotificationId, UserId};

/// A domain event to be turned into notifications by the backend.
///
/// Constructed via [`EventSubmission::new`] and enriched with the builder
/// methods. `new` always generates an idempotency key; use
/// [`with_idempotency_key`](EventSubmission::with_idempotency_key) when
/// retrying a submission that must collapse with an earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubmission {
    pub actor_id: String,
    /// Dot-separated verb, e.g. `"social.like"`.
    pub verb: String,
    pub object_id: String,
    /// Human-readable description of what happened.
    pub context: String,
    /// Structured context; `recipientId` addresses the notification.
    pub context_json: serde_json::Value,
    pub idempotency_key: String,
}

impl EventSubmission {
    pub fn new(
        actor_id: impl Into<String>,
        verb: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        let verb = verb.into();
        let idempotency_key = format!("{verb}-{}", uuid::Uuid::new_v4());
        Self {
            actor_id: actor_id.into(),
            verb,
            object_id: object_id.into(),
            context: String::new(),
            context_json: serde_json::Value::Object(Default::default()),
            idempotency_key,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Address the resulting notification to `recipient`.
    pub fn with_recipient(mut self, recipient: impl Into<UserId>) -> Self {
        if !self.context_json.is_object() {
            self.context_json = serde_json::Value::Object(Default::default());
        }
        if let Some(obj) = self.context_json.as_object_mut() {
            obj.insert(
                "recipientId".to_string(),
                serde_json::Value::String(recipient.into()),
            );
        }
        self
    }

    pub fn with_context_json(mut self, context_json: serde_json::Value) -> Self {
        self.context_json = context_json;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    /// Reject submissions the backend would refuse anyway.
    pub fn validate(&self) -> Result<(), CoreError> {
        let required = [
            ("actorId", &self.actor_id),
            ("verb", &self.verb),
            ("objectId", &self.object_id),
            ("idempotencyKey", &self.idempotency_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Record returned by the backend after accepting a submission.
///
/// Only `id` is relied upon; everything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedEvent {
    pub id: NotificationId,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The demo events offered by the client, addressed to `recipient`.
///
/// One per notification category plus an `opportunity.match` event whose
/// type the client does not know, which exercises the open type set.
pub fn demo_events(recipient: &str) -> Vec<EventSubmission> {
    [
        (
            "alice_chen",
            "social.like",
            "project_123",
            "Alice Chen liked your sustainable architecture project \"Green Tower Complex\"",
        ),
        (
            "project_manager",
            "collaboration.invite",
            "project_456",
            "You have been invited to collaborate on the \"Urban Planning Initiative\" project",
        ),
        (
            "system",
            "system.maintenance",
            "maintenance_001",
            "Platform maintenance scheduled for tonight 2:00 AM - 4:00 AM EST",
        ),
        (
            "job_board",
            "opportunity.match",
            "job_789",
            "New job opportunity: Senior Architect at Sustainable Design Studio - 95% match",
        ),
    ]
    .into_iter()
    .map(|(actor, verb, object, context)| {
        EventSubmission::new(actor, verb, object)
            .with_context(context)
            .with_recipient(recipient)
    })
    .collect()
}
