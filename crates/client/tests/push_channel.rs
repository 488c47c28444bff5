//! End-to-end tests of `EventChannel` over a real WebSocket against the
//! in-process fake backend. Backoff is shortened to milliseconds.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use common::{notification, wait_until, FakeBackend, USER};
use insyd_client::{ChannelError, ChannelSignal, ChannelState, EventChannel};
use tokio::sync::broadcast;

async fn next_signal(signals: &mut broadcast::Receiver<ChannelSignal>) -> ChannelSignal {
    tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("no signal within 5s")
        .expect("signal channel closed")
}

async fn wait_for_state(channel: &EventChannel, wanted: impl Fn(&ChannelState) -> bool) {
    let mut rx = channel.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| wanted(s)))
        .await
        .expect("state not reached within 5s")
        .expect("state channel closed");
}

fn collecting(channel: &EventChannel) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    channel
        .subscribe(move |n| sink.lock().unwrap().push(n.id.clone()))
        .unwrap();
    seen
}

// ---------------------------------------------------------------------------
// Test: connect, receive, dispatch in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivers_pushed_notifications_in_order() {
    let backend = FakeBackend::start().await;
    let channel = EventChannel::new(&backend.config()).unwrap();
    let seen = collecting(&channel);
    let mut signals = channel.signals();

    channel.connect().unwrap();
    assert_eq!(next_signal(&mut signals).await, ChannelSignal::Opened);
    assert_eq!(channel.state(), ChannelState::Open);
    backend.wait_for_sockets(1).await;
    assert_eq!(backend.socket_users(), vec![USER.to_string()]);

    backend.publish(notification("n-1", 1, false));
    backend.publish(notification("n-2", 2, false));

    wait_until(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(*seen.lock().unwrap(), vec!["n-1", "n-2"]);

    channel.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: garbage frames are skipped without closing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frames_do_not_close_the_channel() {
    let backend = FakeBackend::start().await;
    let channel = EventChannel::new(&backend.config()).unwrap();
    let seen = collecting(&channel);

    channel.connect().unwrap();
    wait_for_state(&channel, |s| *s == ChannelState::Open).await;
    backend.wait_for_sockets(1).await;

    backend.push_raw("{not json");
    backend.push_raw(r#"{"type":"presence.update","payload":{}}"#);
    backend.publish(notification("after", 1, false));

    wait_until(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(*seen.lock().unwrap(), vec!["after"]);
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(backend.live_sockets(), 1);

    channel.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: server-side drop triggers a reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_after_server_drop() {
    let backend = FakeBackend::start().await;
    let channel = EventChannel::new(&backend.config()).unwrap();
    let seen = collecting(&channel);
    let mut signals = channel.signals();

    channel.connect().unwrap();
    assert_eq!(next_signal(&mut signals).await, ChannelSignal::Opened);
    backend.wait_for_sockets(1).await;

    backend.drop_sockets();

    assert_eq!(next_signal(&mut signals).await, ChannelSignal::Dropped);
    assert_eq!(next_signal(&mut signals).await, ChannelSignal::Reconnected);
    backend.wait_for_sockets(1).await;
    assert_eq!(backend.socket_users().len(), 2);

    backend.publish(notification("after-reconnect", 1, false));
    wait_until(|| seen.lock().unwrap().len() == 1).await;

    channel.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: unreachable backend exhausts attempts, then manual restart works
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gives_up_after_max_attempts_and_restarts_on_demand() {
    let backend = FakeBackend::start().await;
    let mut config = backend.config();
    config.max_reconnect_attempts = 3;

    // Point the channel at a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    config.push_url = Some(format!("ws://{dead}/"));

    let channel = EventChannel::new(&config).unwrap();
    let mut signals = channel.signals();
    channel.connect().unwrap();

    assert_eq!(
        next_signal(&mut signals).await,
        ChannelSignal::Unavailable { failures: 3 }
    );
    wait_for_state(&channel, |s| *s == ChannelState::Unavailable { failures: 3 }).await;

    // Restarting resets the counter and tries again from scratch.
    channel.connect().unwrap();
    assert_eq!(
        next_signal(&mut signals).await,
        ChannelSignal::Unavailable { failures: 3 }
    );

    channel.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: disconnect closes the socket and is terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_closes_socket_and_terminates() {
    let backend = FakeBackend::start().await;
    let channel = EventChannel::new(&backend.config()).unwrap();
    let seen = collecting(&channel);

    channel.connect().unwrap();
    backend.wait_for_sockets(1).await;

    channel.shutdown().await;
    channel.disconnect();

    assert_eq!(channel.state(), ChannelState::Terminated);
    backend.wait_for_sockets(0).await;

    backend.publish(notification("late", 1, false));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().unwrap().is_empty());

    assert_matches!(channel.connect(), Err(ChannelError::Terminated));
    assert_matches!(channel.subscribe(|_| {}), Err(ChannelError::Terminated));
}
