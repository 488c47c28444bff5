//! Durable push-channel connection manager.
//!
//! An [`EventChannel`] owns one logical subscription to the backend's push
//! source for one user. [`EventChannel::connect`] spawns a driver task that
//! walks the state machine
//!
//! ```text
//! Idle -> Connecting -> Open -> Reconnecting -> Connecting -> ...
//!                  \______________/       \-> Unavailable (attempt cap hit)
//! any state -> Terminated (disconnect)
//! ```
//!
//! Transport failures never escape the driver; they always route through
//! Reconnecting with a delay from the [`BackoffPolicy`]. After
//! `max_reconnect_attempts` consecutive failed handshakes the driver stops
//! and publishes [`ChannelSignal::Unavailable`] once; calling `connect()`
//! again starts over with the attempt counter at zero.
//!
//! [`EventChannel::disconnect`] is the only cancellation primitive. It
//! cancels the pending handshake, read or retry timer, closes the transport,
//! and clears the subscriber list so nothing is delivered afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use insyd_core::types::UserId;
use insyd_core::Notification;
use reqwest::Url;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ConfigError};
use crate::dispatch::{DispatchRegistry, SubscriptionId};
use crate::messages::{parse_frame, PushEvent};
use crate::reconnect::BackoffPolicy;
use crate::transport::{Connector, Transport, WsConnector};

/// Broadcast channel capacity for lifecycle signals.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Upper bound on the polite close of a transport being released.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the driver task in [`EventChannel::shutdown`].
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Observable state of a connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No transport attempt made yet.
    Idle,
    /// Handshake in flight. `attempt` is the retry counter (0 for the first
    /// try after `connect()` or after a drop).
    Connecting { attempt: u32 },
    /// Transport established; frames are being routed.
    Open,
    /// Waiting `delay` before retry `attempt + 1`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Gave up after `failures` consecutive failed handshakes. `connect()`
    /// may be called again.
    Unavailable { failures: u32 },
    /// Torn down by `disconnect()`. Terminal.
    Terminated,
}

/// Lifecycle notifications for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// First Open after `connect()`.
    Opened,
    /// Open again after a drop or failed handshakes. Events sent while
    /// disconnected were not delivered.
    Reconnected,
    /// An open transport was lost; a retry is being scheduled.
    Dropped,
    /// The attempt cap was hit; no further automatic retries.
    Unavailable { failures: u32 },
}

/// Errors returned by [`EventChannel`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel was torn down with `disconnect()`.
    #[error("Channel has been terminated")]
    Terminated,

    /// `connect()` was called outside a Tokio runtime.
    #[error("No Tokio runtime available to drive the channel")]
    NoRuntime,
}

/// Client-side push channel for one user identity.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    endpoint: Url,
    user_id: UserId,
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    registry: DispatchRegistry,
    state_tx: watch::Sender<ChannelState>,
    signal_tx: broadcast::Sender<ChannelSignal>,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    driver: Option<Driver>,
    terminated: bool,
}

struct Driver {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// How a single open transport ended.
enum SessionEnd {
    Cancelled,
    Closed,
    Failed,
}

impl EventChannel {
    /// Create a channel using the WebSocket connector.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config, WsConnector::default())
    }

    /// Create a channel using a custom [`Connector`].
    pub fn with_connector(
        config: &ClientConfig,
        connector: impl Connector,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let (signal_tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(ChannelInner {
                endpoint: config.push_endpoint()?,
                user_id: config.user_id.clone(),
                connector: Arc::new(connector),
                backoff: config.backoff,
                max_attempts: config.max_reconnect_attempts,
                registry: DispatchRegistry::new(),
                state_tx,
                signal_tx,
                session: Mutex::new(Session::default()),
            }),
        })
    }

    /// Start (or restart after [`ChannelState::Unavailable`]) the session.
    ///
    /// A no-op while the driver is already connecting, open or backing off.
    pub fn connect(&self) -> Result<(), ChannelError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let mut session = self.inner.lock_session();
        if session.terminated {
            return Err(ChannelError::Terminated);
        }

        let running = !matches!(
            self.state(),
            ChannelState::Idle | ChannelState::Unavailable { .. }
        );
        if running {
            return Ok(());
        }
        if let Some(previous) = session.driver.take() {
            previous.cancel.cancel();
        }

        tracing::info!(user_id = %self.inner.user_id, "Connecting push channel");
        self.inner.set_state(ChannelState::Connecting { attempt: 0 });

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = runtime.spawn(async move {
            run_driver(&inner, &token).await;
            tracing::debug!(user_id = %inner.user_id, "Push channel driver exited");
        });

        session.driver = Some(Driver { cancel, handle });
        Ok(())
    }

    /// Tear the session down. Safe to call any number of times, from any
    /// state, including mid-handshake.
    pub fn disconnect(&self) {
        let mut session = self.inner.lock_session();
        if session.terminated {
            return;
        }
        session.terminated = true;
        if let Some(driver) = &session.driver {
            driver.cancel.cancel();
        }
        self.inner.registry.close();
        self.inner.set_state(ChannelState::Terminated);
        tracing::info!(user_id = %self.inner.user_id, "Push channel terminated");
    }

    /// [`disconnect`](Self::disconnect), then wait for the driver to release
    /// its transport.
    pub async fn shutdown(&self) {
        self.disconnect();
        let driver = self.inner.lock_session().driver.take();
        if let Some(driver) = driver {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, driver.handle).await;
        }
    }

    /// Register a callback for every new notification.
    pub fn subscribe<F>(&self, callback: F) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .register(callback)
            .ok_or(ChannelError::Terminated)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.registry.unregister(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Receive lifecycle signals from now on.
    pub fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.inner.signal_tx.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }
}

impl ChannelInner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new state. Terminated is sticky: a driver that has not yet
    /// observed its cancellation cannot leave it.
    fn set_state(&self, next: ChannelState) {
        self.state_tx.send_if_modified(|current| {
            if *current == ChannelState::Terminated || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn signal(&self, signal: ChannelSignal) {
        // Zero receivers is fine.
        let _ = self.signal_tx.send(signal);
    }

    /// Route one text frame to the subscribers.
    fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Ok(PushEvent::NewNotification(notification)) => {
                if notification.recipient_id != self.user_id {
                    tracing::warn!(
                        user_id = %self.user_id,
                        recipient_id = %notification.recipient_id,
                        notification_id = %notification.id,
                        "Dropping notification addressed to another user",
                    );
                    return;
                }
                let outcome = self.registry.dispatch(&notification);
                tracing::debug!(
                    notification_id = %notification.id,
                    delivered = outcome.delivered,
                    failed = outcome.failed,
                    "Dispatched notification",
                );
            }
            Ok(PushEvent::Ignored { kind }) => {
                tracing::debug!(kind = %kind, "Ignoring push frame");
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    error = %e,
                    len = text.len(),
                    "Dropping malformed push frame",
                );
            }
        }
    }
}

/// Core session loop: connect -> pump frames -> back off -> connect.
///
/// Runs until cancelled or until the attempt cap is hit.
async fn run_driver(inner: &ChannelInner, cancel: &CancellationToken) {
    let user_id = inner.user_id.as_str();
    // Backoff key; resets when Open is reached.
    let mut attempt: u32 = 0;
    // Consecutive failed handshakes since the last Open.
    let mut failures: u32 = 0;
    let mut has_opened = false;

    loop {
        inner.set_state(ChannelState::Connecting { attempt });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = inner.connector.connect(&inner.endpoint) => result,
        };

        match result {
            Ok(mut transport) => {
                if cancel.is_cancelled() {
                    release(transport.as_mut()).await;
                    return;
                }
                attempt = 0;
                failures = 0;
                inner.set_state(ChannelState::Open);
                tracing::info!(user_id, "Push channel open");
                inner.signal(if has_opened {
                    ChannelSignal::Reconnected
                } else {
                    ChannelSignal::Opened
                });
                has_opened = true;

                let end = pump_frames(inner, transport.as_mut(), cancel).await;
                release(transport.as_mut()).await;

                if matches!(end, SessionEnd::Cancelled) || cancel.is_cancelled() {
                    return;
                }
                tracing::warn!(user_id, "Push channel lost");
                inner.signal(ChannelSignal::Dropped);
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    user_id,
                    attempt,
                    failures,
                    error = %e,
                    "Push channel handshake failed",
                );
                if failures >= inner.max_attempts {
                    tracing::error!(
                        user_id,
                        failures,
                        "Push channel unavailable, giving up until connect() is called again",
                    );
                    inner.set_state(ChannelState::Unavailable { failures });
                    inner.signal(ChannelSignal::Unavailable { failures });
                    return;
                }
            }
        }

        let delay = inner.backoff.delay(attempt);
        inner.set_state(ChannelState::Reconnecting { attempt, delay });
        tracing::info!(
            user_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting push channel",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Read frames until the transport ends or the session is cancelled.
///
/// Frames are handled strictly in arrival order; dispatch is synchronous so
/// the next frame is not read until every subscriber has seen this one.
async fn pump_frames(
    inner: &ChannelInner,
    transport: &mut dyn Transport,
    cancel: &CancellationToken,
) -> SessionEnd {
    let user_id = inner.user_id.as_str();
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            frame = transport.next_frame() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => inner.handle_text(&text),
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(user_id, "Ignoring binary push frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(user_id, ?frame, "Push channel closed by server");
                return SessionEnd::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "Push channel receive error");
                return SessionEnd::Failed;
            }
            None => {
                tracing::info!(user_id, "Push channel stream exhausted");
                return SessionEnd::Closed;
            }
        }
    }
}

async fn release(transport: &mut dyn Transport) {
    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close())
        .await
        .is_err()
    {
        tracing::debug!("Transport close timed out; dropping it");
    }
}
