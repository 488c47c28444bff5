//! Streaming loop: log the feed as it changes until told to stop.

use std::collections::HashSet;
use std::future::Future;

use insyd_client::{ChannelSignal, NotificationFeed};
use insyd_core::Notification;
use tokio::sync::broadcast;

use crate::render;

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The shutdown future completed.
    Shutdown,
    /// The push channel gave up after `failures` consecutive failed
    /// handshakes.
    Unavailable { failures: u32 },
}

/// Remembers which notifications have been shown.
#[derive(Debug, Default)]
pub struct SeenTracker {
    seen: HashSet<String>,
}

impl SeenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries of `view` (newest first) not shown before, oldest first.
    pub fn fresh<'a>(&mut self, view: &'a [Notification]) -> Vec<&'a Notification> {
        let mut fresh: Vec<&Notification> = view
            .iter()
            .filter(|n| self.seen.insert(n.id.clone()))
            .collect();
        fresh.reverse();
        fresh
    }
}

/// Log the current view, then every new entry and channel signal until
/// `shutdown` resolves or the channel becomes unavailable.
pub async fn run(feed: &NotificationFeed, shutdown: impl Future<Output = ()>) -> WatchOutcome {
    let mut tracker = SeenTracker::new();
    let mut updates = feed.updates();
    let mut signals = feed.signals();
    tokio::pin!(shutdown);

    show(feed, &mut tracker);

    loop {
        tokio::select! {
            _ = &mut shutdown => return WatchOutcome::Shutdown,
            changed = updates.changed() => {
                if changed.is_err() {
                    return WatchOutcome::Shutdown;
                }
                show(feed, &mut tracker);
            }
            signal = signals.recv() => match signal {
                Ok(ChannelSignal::Unavailable { failures }) => {
                    return WatchOutcome::Unavailable { failures };
                }
                Ok(ChannelSignal::Dropped) => tracing::warn!("Connection lost, reconnecting"),
                Ok(ChannelSignal::Reconnected) => tracing::info!("Reconnected"),
                Ok(ChannelSignal::Opened) => tracing::info!("Live updates on"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return WatchOutcome::Shutdown,
            },
        }
    }
}

fn show(feed: &NotificationFeed, tracker: &mut SeenTracker) {
    let view = feed.notifications();
    let fresh = tracker.fresh(&view);
    if fresh.is_empty() {
        return;
    }
    for n in fresh {
        tracing::info!(id = %n.id, "{}", render::notification_line(n));
    }
    tracing::info!(
        total = view.len(),
        unread = feed.unread_count(),
        "Feed updated",
    );
}
