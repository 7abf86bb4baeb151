//! Session synchronization orchestrator
//!
//! Wires one [`ReconnectingChannel`] and one [`MetadataBus`] together and
//! folds the live signals into a [`SessionSnapshot`] the UI layer can watch.
//! The same logical event may arrive twice (push channel and in-band video
//! cue), so every state-bearing subscription carries a signature function;
//! convergence relies on deduplication, not arrival order.
//!
//! Nothing here propagates an error to the UI: decode failures drop one
//! event, transport failures are retried by the channel, and the only
//! caller-visible failure signal is [`ConnectionState`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::bus::{MetadataBus, SubscribeOptions, SubscriptionGuard, TypedEvent};
use crate::channel::{ConnectionState, ReconnectingChannel, Transport, UrlBuilder};
use crate::config::ChannelConfig;
use crate::continuity::Visibility;
use crate::events::{
    InjectionAction, OfferScarcityUpdate, OfferVisibility, SessionStatus, SessionUpdate,
    VideoInjectionUpdate, BRIDGED_EVENTS, OFFER_SCARCITY_UPDATE, OFFER_VISIBILITY, SESSION_UPDATE,
    VIDEO_INJECTION_UPDATE,
};

/// Commerce-offer state as seen by this viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferState {
    pub visible: bool,
    pub shown_at: Option<DateTime<Utc>>,
    pub spots_left: Option<u32>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// A secondary video currently overlaid on the broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveInjection {
    pub video_injection_id: Option<String>,
    pub playback_url: Option<String>,
    pub title: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Converged session state consumed by the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub offer: OfferState,
    pub injection: Option<ActiveInjection>,
}

/// Orchestrates the push channel and metadata bus for one live session.
pub struct SessionSync {
    session_id: String,
    bus: Arc<MetadataBus>,
    channel: ReconnectingChannel,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    _subscriptions: Vec<SubscriptionGuard>,
}

impl SessionSync {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let session_id = session_id.into();
        let bus = Arc::new(MetadataBus::new());
        let channel = ReconnectingChannel::new(config, transport);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let subscriptions = subscribe_state_handlers(&bus, &session_id, snapshot_tx);
        bridge_channel(&channel, &bus);

        Self {
            session_id,
            bus,
            channel,
            snapshot_rx,
            _subscriptions: subscriptions,
        }
    }

    /// Open the push channel. Idempotent, like the channel itself.
    pub fn start(&self, url_builder: UrlBuilder) {
        self.channel.open(url_builder);
    }

    /// Close the push channel for good; snapshot stays at its last value.
    pub async fn shutdown(&self) {
        self.channel.close().await;
    }

    /// Feed a decoded in-band metadata cue (`{"type", "payload"}` JSON text).
    /// Malformed cues are logged and dropped; they never surface upward.
    pub fn ingest_cue(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "Dropping unparseable metadata cue");
                return;
            }
        };
        match TypedEvent::from_cue_json(&value) {
            Ok(event) => self.bus.publish(&event),
            Err(err) => debug!(error = %err, "Dropping malformed metadata cue"),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The session's bus, for additional subscribers (e.g. overlay widgets).
    #[must_use]
    pub const fn bus(&self) -> &Arc<MetadataBus> {
        &self.bus
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    #[must_use]
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.watch_state()
    }

    pub fn network_online(&self) {
        self.channel.network_online();
    }

    pub fn network_offline(&self) {
        self.channel.network_offline();
    }

    pub fn visibility_changed(&self, visibility: Visibility) {
        self.channel.visibility_changed(visibility);
    }
}

/// Forward every known named push-channel event onto the bus.
fn bridge_channel(channel: &ReconnectingChannel, bus: &Arc<MetadataBus>) {
    for event_type in BRIDGED_EVENTS {
        let bus = bus.clone();
        channel.on(event_type, move |message| {
            match serde_json::from_str::<Value>(&message.data) {
                Ok(payload) => bus.publish(&TypedEvent::new(event_type, payload)),
                Err(err) => debug!(
                    event_type,
                    error = %err,
                    "Dropping malformed push-channel payload"
                ),
            }
        });
    }
}

/// Register the snapshot-folding subscriptions, deduplicated by signature.
fn subscribe_state_handlers(
    bus: &MetadataBus,
    session_id: &str,
    snapshot_tx: watch::Sender<SessionSnapshot>,
) -> Vec<SubscriptionGuard> {
    let snapshot_tx = Arc::new(snapshot_tx);
    let opts = SubscribeOptions::for_session(session_id);
    let mut guards = Vec::with_capacity(4);

    let tx = snapshot_tx.clone();
    guards.push(bus.subscribe_deduped(
        SESSION_UPDATE,
        opts.clone(),
        |update: &SessionUpdate| format!("{:?}", update.status),
        move |update: SessionUpdate| {
            tx.send_modify(|snapshot| snapshot.status = update.status);
        },
    ));

    let tx = snapshot_tx.clone();
    guards.push(bus.subscribe_deduped(
        OFFER_VISIBILITY,
        opts.clone(),
        |offer: &OfferVisibility| format!("{}:{:?}", offer.visible, offer.shown_at),
        move |offer: OfferVisibility| {
            tx.send_modify(|snapshot| {
                snapshot.offer.visible = offer.visible;
                snapshot.offer.shown_at = offer.shown_at;
            });
        },
    ));

    let tx = snapshot_tx.clone();
    guards.push(bus.subscribe_deduped(
        OFFER_SCARCITY_UPDATE,
        opts.clone(),
        |scarcity: &OfferScarcityUpdate| {
            format!("{:?}:{:?}", scarcity.spots_left, scarcity.ends_at)
        },
        move |scarcity: OfferScarcityUpdate| {
            tx.send_modify(|snapshot| {
                snapshot.offer.spots_left = scarcity.spots_left;
                snapshot.offer.ends_at = scarcity.ends_at;
            });
        },
    ));

    let tx = snapshot_tx;
    guards.push(bus.subscribe_deduped(
        VIDEO_INJECTION_UPDATE,
        opts,
        |injection: &VideoInjectionUpdate| {
            format!("{:?}:{:?}", injection.action, injection.video_injection_id)
        },
        move |injection: VideoInjectionUpdate| {
            tx.send_modify(|snapshot| match injection.action {
                InjectionAction::Start => {
                    snapshot.injection = Some(ActiveInjection {
                        video_injection_id: injection.video_injection_id.clone(),
                        playback_url: injection.playback_url.clone(),
                        title: injection.title.clone(),
                        duration_ms: injection.duration_ms,
                    });
                }
                InjectionAction::Stop => snapshot.injection = None,
            });
        },
    ));

    guards
}
