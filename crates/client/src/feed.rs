//! Per-user notification feed.
//!
//! [`NotificationFeed`] owns exactly one [`EventChannel`] and one
//! [`DirectoryClient`] for a user view. It issues one snapshot request on
//! start, prepends live pushes as they arrive, applies read mutations
//! optimistically, and re-lists after every reconnect so events missed
//! while disconnected show up.
//!
//! A failed backend write is never rolled back locally; it marks the feed
//! stale and the next [`refresh`](NotificationFeed::refresh) reconciles
//! the view against the server.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use insyd_core::types::{NotificationId, UserId};
use insyd_core::Notification;
use tokio::sync::{broadcast, watch};

use crate::api::{DirectoryClient, DirectoryError};
use crate::channel::{ChannelError, ChannelSignal, ChannelState, EventChannel};
use crate::config::{ClientConfig, ConfigError};

/// Feed behaviour knobs, usually taken from [`ClientConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    /// Page size of snapshot requests.
    pub list_limit: u32,
    /// Re-list after every [`ChannelSignal::Reconnected`].
    pub refetch_on_reconnect: bool,
}

impl From<&ClientConfig> for FeedOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            list_limit: config.list_limit,
            refetch_on_reconnect: config.refetch_on_reconnect,
        }
    }
}

/// Errors surfaced by [`NotificationFeed`].
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Ordered, optimistically-updated notification view for one user.
pub struct NotificationFeed {
    shared: Arc<FeedShared>,
    channel: EventChannel,
    refetch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct FeedShared {
    directory: DirectoryClient,
    view: Mutex<FeedView>,
    revision: watch::Sender<u64>,
    /// Serializes snapshot requests so their merges never interleave.
    refresh_lock: tokio::sync::Mutex<()>,
    list_limit: u32,
}

impl NotificationFeed {
    /// Open a feed over WebSocket + HTTP using `config`.
    pub async fn start(config: &ClientConfig) -> Result<Self, FeedError> {
        let directory = DirectoryClient::new(config)?;
        let channel = EventChannel::new(config)?;
        Self::start_with(directory, channel, FeedOptions::from(config)).await
    }

    /// Open a feed over an existing directory client and an idle channel.
    ///
    /// The channel is connected and the initial snapshot requested
    /// concurrently. If the snapshot fails the channel is torn down and the
    /// error returned.
    pub async fn start_with(
        directory: DirectoryClient,
        channel: EventChannel,
        options: FeedOptions,
    ) -> Result<Self, FeedError> {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(FeedShared {
            view: Mutex::new(FeedView::new(directory.user_id().to_string())),
            directory,
            revision,
            refresh_lock: tokio::sync::Mutex::new(()),
            list_limit: options.list_limit,
        });

        {
            let shared = Arc::clone(&shared);
            channel.subscribe(move |notification: &Notification| {
                shared.on_live(notification.clone());
            })?;
        }
        let signals = channel.signals();

        let feed = Self {
            shared: Arc::clone(&shared),
            channel,
            refetch_task: Mutex::new(None),
        };

        if let Err(e) = feed.channel.connect() {
            feed.channel.shutdown().await;
            return Err(e.into());
        }

        if let Err(e) = shared.refresh().await {
            tracing::error!(
                user_id = %shared.directory.user_id(),
                error = %e,
                "Initial notification load failed",
            );
            feed.channel.shutdown().await;
            return Err(e.into());
        }

        if options.refetch_on_reconnect {
            let task = tokio::spawn(refetch_on_reconnect(Arc::clone(&shared), signals));
            *feed.lock_task() = Some(task);
        }

        Ok(feed)
    }

    /// Current view, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.lock_view().items.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.shared.lock_view().unread_count()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_view().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` after a backend write failed and until the next successful
    /// refresh.
    pub fn is_stale(&self) -> bool {
        self.shared.lock_view().stale
    }

    /// Revision counter bumped on every view change.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn signals(&self) -> broadcast::Receiver<ChannelSignal> {
        self.channel.signals()
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.shared.directory
    }

    /// Mark one notification read locally, then on the backend.
    pub async fn mark_read(&self, notification_id: &str) -> Result<(), FeedError> {
        let changed = self.shared.lock_view().mark_read(notification_id);
        if changed {
            self.shared.bump();
        }

        if let Err(e) = self.shared.directory.mark_read(notification_id).await {
            self.shared.mark_stale();
            tracing::warn!(
                notification_id,
                error = %e,
                "mark_read failed; view left as is until next refresh",
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Mark everything read locally, then on the backend.
    pub async fn mark_all_read(&self) -> Result<(), FeedError> {
        let changed = self.shared.lock_view().mark_all_read();
        if changed > 0 {
            self.shared.bump();
        }

        if let Err(e) = self.shared.directory.mark_all_read().await {
            self.shared.mark_stale();
            tracing::warn!(
                error = %e,
                "mark_all_read failed; view left as is until next refresh",
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Re-list from the backend and reconcile the view with it.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        Ok(self.shared.refresh().await?)
    }

    /// Restart the push channel after it reported itself unavailable.
    pub fn reconnect(&self) -> Result<(), FeedError> {
        Ok(self.channel.connect()?)
    }

    /// Tear down the push channel and background work. Idempotent.
    pub async fn close(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.abort();
        }
        self.channel.shutdown().await;
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<tokio::task::JoinHandle<()>>> {
        self.refetch_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl FeedShared {
    fn lock_view(&self) -> MutexGuard<'_, FeedView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn mark_stale(&self) {
        self.lock_view().stale = true;
    }

    fn on_live(&self, notification: Notification) {
        let id = notification.id.clone();
        let inserted = self.lock_view().push_live(notification);
        if inserted {
            self.bump();
        } else {
            tracing::debug!(notification_id = %id, "Skipping duplicate live notification");
        }
    }

    async fn refresh(&self) -> Result<(), DirectoryError> {
        let _guard = self.refresh_lock.lock().await;

        let since = self.lock_view().begin_snapshot();
        match self
            .directory
            .list_notifications(None, self.list_limit)
            .await
        {
            Ok(snapshot) => {
                self.lock_view().apply_snapshot(snapshot, since);
                self.bump();
                Ok(())
            }
            Err(e) => {
                self.lock_view().abort_snapshot();
                Err(e)
            }
        }
    }
}

async fn refetch_on_reconnect(
    shared: Arc<FeedShared>,
    mut signals: broadcast::Receiver<ChannelSignal>,
) {
    loop {
        match signals.recv().await {
            Ok(ChannelSignal::Reconnected) => {
                tracing::info!(
                    user_id = %shared.directory.user_id(),
                    "Push channel reconnected, refreshing feed",
                );
                if let Err(e) = shared.refresh().await {
                    tracing::warn!(error = %e, "Refresh after reconnect failed");
                    shared.mark_stale();
                }
            }
            Ok(ChannelSignal::Unavailable { failures }) => {
                tracing::error!(failures, "Push channel unavailable; live updates paused");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Feed lagged behind channel signals");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// FeedView
// ---------------------------------------------------------------------------

/// Read mark recorded while a snapshot request is in flight, so it can be
/// replayed on top of the snapshot.
#[derive(Debug, Clone)]
enum LocalOp {
    Read(NotificationId),
    ReadAll,
}

/// The merged, ordered view. Pure data; no I/O.
#[derive(Debug)]
struct FeedView {
    user_id: UserId,
    /// Pushed entries first (latest arrival first), then the last snapshot
    /// in server order.
    items: VecDeque<Notification>,
    /// Length of the pushed prefix of `items`.
    live_len: usize,
    /// Sequence number of the last local op.
    seq: u64,
    /// Local ops newer than the oldest in-flight snapshot.
    log: Vec<(u64, LocalOp)>,
    snapshots_in_flight: usize,
    stale: bool,
}

impl FeedView {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: VecDeque::new(),
            live_len: 0,
            seq: 0,
            log: Vec::new(),
            snapshots_in_flight: 0,
            stale: false,
        }
    }

    fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    fn record(&mut self, op: LocalOp) {
        self.seq += 1;
        if self.snapshots_in_flight > 0 {
            self.log.push((self.seq, op));
        }
    }

    /// Insert a pushed notification ahead of everything else. Returns
    /// `false` if a notification with that id is already present.
    fn push_live(&mut self, notification: Notification) -> bool {
        if self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.items.push_front(notification);
        self.live_len += 1;
        true
    }

    fn mark_read(&mut self, id: &str) -> bool {
        let changed = self
            .items
            .iter_mut()
            .find(|n| n.id == id)
            .is_some_and(|n| n.mark_read());
        self.record(LocalOp::Read(id.to_string()));
        changed
    }

    fn mark_all_read(&mut self) -> usize {
        let changed = self
            .items
            .iter_mut()
            .map(|n| n.mark_read())
            .filter(|changed| *changed)
            .count();
        self.record(LocalOp::ReadAll);
        changed
    }

    /// Start tracking local ops; returns the marker to pass to
    /// [`apply_snapshot`](Self::apply_snapshot).
    fn begin_snapshot(&mut self) -> u64 {
        self.snapshots_in_flight += 1;
        self.seq
    }

    fn abort_snapshot(&mut self) {
        self.finish_snapshot();
    }

    fn finish_snapshot(&mut self) {
        self.snapshots_in_flight = self.snapshots_in_flight.saturating_sub(1);
        if self.snapshots_in_flight == 0 {
            self.log.clear();
        }
    }

    /// Replace the snapshot part of the view with `snapshot` (server order).
    ///
    /// Pushed entries stay in front in arrival order; where the snapshot
    /// also lists one, the server's copy replaces the local one in place.
    /// Read marks made after `since` are replayed on top.
    fn apply_snapshot(&mut self, snapshot: Vec<Notification>, since: u64) {
        let recent: Vec<LocalOp> = self
            .log
            .iter()
            .filter(|(seq, _)| *seq > since)
            .map(|(_, op)| op.clone())
            .collect();

        let live_len = self.live_len.min(self.items.len());
        let mut merged: VecDeque<Notification> = self.items.drain(..live_len).collect();
        let mut seen: HashSet<String> = merged.iter().map(|n| n.id.clone()).collect();

        for notification in snapshot {
            if notification.recipient_id != self.user_id {
                tracing::warn!(
                    user_id = %self.user_id,
                    notification_id = %notification.id,
                    "Dropping listed notification addressed to another user",
                );
                continue;
            }
            if let Some(pushed) = merged
                .iter_mut()
                .take(live_len)
                .find(|n| n.id == notification.id)
            {
                *pushed = notification;
                continue;
            }
            if seen.insert(notification.id.clone()) {
                merged.push_back(notification);
            }
        }

        for op in &recent {
            match op {
                LocalOp::Read(id) => {
                    if let Some(n) = merged.iter_mut().find(|n| &n.id == id) {
                        n.mark_read();
                    }
                }
                LocalOp::ReadAll => merged.iter_mut().for_each(|n| {
                    n.mark_read();
                }),
            }
        }

        self.items = merged;
        self.live_len = live_len;
        self.stale = false;
        self.finish_snapshot();
    }
}
