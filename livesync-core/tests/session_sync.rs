//! End-to-end session synchronization tests: a scripted push channel plus
//! in-band cues feeding one `SessionSync`, across reconnects.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use livesync_core::channel::{ChannelMessage, ConnectionState, MessageStream, Transport};
use livesync_core::config::ChannelConfig;
use livesync_core::events::SessionStatus;
use livesync_core::session::SessionSync;

/// Each connect pops one script entry: the messages to deliver before the
/// stream dies. An empty script entry hangs silently (healthy connection).
struct ScriptedTransport {
    connections: Mutex<VecDeque<Vec<ChannelMessage>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(connections: Vec<Vec<ChannelMessage>>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into()),
            urls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, url: &str) -> livesync_core::Result<MessageStream> {
        self.urls.lock().push(url.to_string());
        let messages = self.connections.lock().pop_front();
        match messages {
            Some(messages) if messages.is_empty() => Ok(Box::pin(futures::stream::pending())),
            Some(messages) => Ok(Box::pin(futures::stream::iter(
                messages.into_iter().map(Ok),
            ))),
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }
}

fn named(event: &str, data: &str, id: &str) -> ChannelMessage {
    ChannelMessage {
        event: Some(event.to_string()),
        data: data.to_string(),
        id: Some(id.to_string()),
    }
}

fn config_without_jitter() -> ChannelConfig {
    ChannelConfig {
        jitter_pct: 0.0,
        ..ChannelConfig::default()
    }
}

async fn settle() {
    for _ in 0..30 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn snapshot_converges_across_a_reconnect() {
    // First connection delivers the go-live, then dies; the second resumes
    // from the last event id and delivers the offer.
    let transport = ScriptedTransport::new(vec![
        vec![named(
            "webinar:session:update",
            r#"{"status":"live"}"#,
            "10",
        )],
        vec![named(
            "webinar:offer:visibility",
            r#"{"session_id":"s1","visible":true,"shown_at":"2024-05-01T12:00:00Z"}"#,
            "11",
        )],
        vec![],
    ]);

    let sync = SessionSync::new("s1", config_without_jitter(), transport.clone());
    sync.start(Arc::new(|last_event_id| match last_event_id {
        Some(id) => format!("https://push.test/stream?channels=s1&lastEventId={id}"),
        None => "https://push.test/stream?channels=s1".to_string(),
    }));

    settle().await;
    assert_eq!(sync.snapshot().status, SessionStatus::Live);
    assert!(!sync.snapshot().offer.visible);

    // Backoff delay (1s, no jitter), then the resumed connection.
    tokio::time::advance(Duration::from_millis(1_000)).await;
    settle().await;

    assert!(sync.snapshot().offer.visible);
    assert_eq!(sync.snapshot().status, SessionStatus::Live);

    let urls = transport.urls.lock().clone();
    assert_eq!(urls[0], "https://push.test/stream?channels=s1");
    assert_eq!(
        urls[1],
        "https://push.test/stream?channels=s1&lastEventId=10"
    );

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn the_same_logical_event_over_both_transports_applies_once() {
    let transport = ScriptedTransport::new(vec![vec![named(
        "webinar:offer:visibility",
        r#"{"session_id":"s1","visible":true}"#,
        "20",
    )]]);

    let sync = SessionSync::new("s1", config_without_jitter(), transport);
    sync.start(Arc::new(|_| "https://push.test/stream".to_string()));

    settle().await;
    assert!(sync.snapshot().offer.visible);

    let mut snapshot = sync.watch_snapshot();
    snapshot.borrow_and_update();

    // The video bitstream carries the same signal; the signature matches,
    // so nothing re-applies.
    sync.ingest_cue(
        r#"{"type":"webinar:offer:visibility","payload":{"session_id":"s1","visible":true}}"#,
    );
    assert!(!snapshot.has_changed().unwrap_or(true));

    // A genuinely new signal still lands.
    sync.ingest_cue(
        r#"{"type":"webinar:offer:visibility","payload":{"session_id":"s1","visible":false}}"#,
    );
    assert!(!sync.snapshot().offer.visible);

    sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connection_state_is_the_only_failure_signal() {
    let transport = ScriptedTransport::new(vec![
        vec![named(
            "webinar:session:update",
            r#"{"status":"live"}"#,
            "1",
        )],
        vec![],
    ]);

    let sync = SessionSync::new("s1", config_without_jitter(), transport);
    let mut states = sync.watch_connection_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Idle);

    sync.start(Arc::new(|_| "https://push.test/stream".to_string()));
    settle().await;

    // The first stream already ended: the channel is waiting out its backoff.
    assert_eq!(sync.connection_state(), ConnectionState::Reconnecting);
    assert_eq!(sync.snapshot().status, SessionStatus::Live);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    settle().await;
    assert_eq!(sync.connection_state(), ConnectionState::Open);

    sync.shutdown().await;
    assert_eq!(sync.connection_state(), ConnectionState::Closed);
}
