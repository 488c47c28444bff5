//! REST client for the notification backend.
//!
//! [`DirectoryClient`] is a stateless façade bound to one base address and
//! one identity. Every operation is a single request; non-2xx responses
//! surface as [`DirectoryError::Api`] and nothing is retried here.

use insyd_core::types::UserId;
use insyd_core::{CoreError, EventSubmission, Notification, Preferences, SubmittedEvent};
use reqwest::{StatusCode, Url};

use crate::config::{ClientConfig, ConfigError};

/// HTTP client for the `/v1/notifications` API of one user.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    base: Url,
    user_id: UserId,
}

/// Errors from the directory layer.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Notification API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the body, or the raw body.
        message: String,
    },

    /// The client configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request was rejected before being sent.
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl DirectoryError {
    /// Backend status code, if the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            DirectoryError::Api { status, .. } => Some(*status),
            DirectoryError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl DirectoryClient {
    /// Create a client with its own connection pool and the configured
    /// request timeout.
    pub fn new(config: &ClientConfig) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config)?)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client,
            base: config.api_base()?,
            user_id: config.user_id.clone(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// List notifications, newest first.
    ///
    /// `is_read` filters by read state; `None` returns both. `limit` bounds
    /// the result size.
    pub async fn list_notifications(
        &self,
        is_read: Option<bool>,
        limit: u32,
    ) -> Result<Vec<Notification>, DirectoryError> {
        let mut query: Vec<(&str, String)> = vec![("userId", self.user_id.clone())];
        if let Some(is_read) = is_read {
            query.push(("is_read", is_read.to_string()));
        }
        query.push(("limit", limit.to_string()));

        let response = self
            .client
            .get(self.endpoint(&["v1", "notifications"]))
            .query(&query)
            .send()
            .await?;

        let notifications: Vec<Notification> = Self::parse_response(response).await?;
        tracing::debug!(
            user_id = %self.user_id,
            count = notifications.len(),
            "Listed notifications",
        );
        Ok(notifications)
    }

    /// Mark one notification as read. Marking an already-read notification
    /// succeeds.
    pub async fn mark_read(&self, notification_id: &str) -> Result<(), DirectoryError> {
        let response = self
            .client
            .post(self.endpoint(&["v1", "notifications", notification_id, "read"]))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Mark every notification of the bound user as read.
    pub async fn mark_all_read(&self) -> Result<(), DirectoryError> {
        let response = self
            .client
            .post(self.endpoint(&["v1", "notifications", "read-all"]))
            .query(&[("userId", self.user_id.as_str())])
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Fetch the bound user's preferences.
    ///
    /// A `404` or a `null` body means nothing is stored yet and yields
    /// [`Preferences::default`].
    pub async fn get_preferences(&self) -> Result<Preferences, DirectoryError> {
        let response = self
            .client
            .get(self.endpoint(&["v1", "notifications", "preferences"]))
            .query(&[("userId", self.user_id.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(user_id = %self.user_id, "No stored preferences, using defaults");
            return Ok(Preferences::default());
        }

        let stored: Option<Preferences> = Self::parse_response(response).await?;
        Ok(stored.unwrap_or_default())
    }

    /// Replace the bound user's preferences.
    pub async fn set_preferences(&self, preferences: &Preferences) -> Result<(), DirectoryError> {
        let response = self
            .client
            .put(self.endpoint(&["v1", "notifications", "preferences"]))
            .query(&[("userId", self.user_id.as_str())])
            .json(preferences)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Submit a domain event for the backend to turn into notifications.
    ///
    /// The submission's idempotency key lets the backend collapse retries.
    pub async fn submit_event(
        &self,
        event: &EventSubmission,
    ) -> Result<SubmittedEvent, DirectoryError> {
        event.validate()?;

        let response = self
            .client
            .post(self.endpoint(&["v1", "notifications", "events"]))
            .json(event)
            .send()
            .await?;

        let created: SubmittedEvent = Self::parse_response(response).await?;
        tracing::info!(
            verb = %event.verb,
            idempotency_key = %event.idempotency_key,
            notification_id = %created.id,
            "Event submitted",
        );
        Ok(created)
    }

    // ---- private helpers ----

    /// Base address with `segments` appended (each one percent-encoded).
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`DirectoryError::Api`]
    /// carrying the status and error message on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, DirectoryError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let message = error_message(status, &body);
            tracing::warn!(status = status.as_u16(), message = %message, "Notification API error");
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DirectoryError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), DirectoryError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Pull a human-readable message out of an error body.
///
/// Prefers a JSON `error` or `message` string, falls back to the raw body,
/// then to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|key| v.get(key).and_then(|m| m.as_str()).map(str::to_owned))
        });
    if let Some(message) = from_json {
        return message;
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("Unknown error")
        .to_string()
}
