//! In-band metadata event bus
//!
//! A typed publish/subscribe hub for live-session signals. Events reach the
//! bus from two independent transports (the push channel and timed-metadata
//! cues decoded from the video bitstream), so duplicate and out-of-order
//! delivery is normal: subscribers that need at-most-once semantics supply a
//! signature function and the bus drops events whose signature matches the
//! last one delivered to that subscription.
//!
//! Each subscription validates the payload against its own schema (serde
//! deserialization into the subscriber's type). A payload that fails to parse
//! is dropped for that subscriber only; other types' subscribers are never
//! affected. `publish` is synchronous fire-and-forget and subscriber panics
//! never propagate back to the publisher.

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A source-agnostic live-session event.
///
/// Immutable once constructed; may originate from a named push-channel event
/// or from a decoded in-band metadata cue.
#[derive(Debug, Clone)]
pub struct TypedEvent {
    event_type: String,
    payload: Value,
    session_id: Option<String>,
}

impl TypedEvent {
    /// Wrap an already-decoded payload under an event type discriminator.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        let session_id = payload
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            event_type: event_type.into(),
            payload,
            session_id,
        }
    }

    /// Decode an in-band metadata cue of the form `{"type": ..., "payload": ...}`.
    pub fn from_cue_json(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| Error::decode("metadata cue is not a JSON object"))?;
        let event_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::decode("metadata cue has no string `type` field"))?;
        let payload = obj.get("payload").cloned().unwrap_or(Value::Null);
        Ok(Self::new(event_type, payload))
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Session scope declared by the payload, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Subscription options
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only deliver events whose payload declares this session id.
    /// Events that declare no session id always pass the filter.
    pub session_id: Option<String>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

type Deliver = Box<dyn Fn(&TypedEvent, &Mutex<Option<String>>) + Send + Sync>;

struct SubEntry {
    id: u64,
    event_type: String,
    session_filter: Option<String>,
    /// Signature of the last event delivered to this subscription.
    last_signature: Mutex<Option<String>>,
    deliver: Deliver,
}

type SubList = RwLock<Vec<Arc<SubEntry>>>;

/// Typed publish/subscribe hub for live-session signals.
///
/// An explicit instance owned by the session orchestrator, passed by
/// reference to subscribers; there is no process-wide bus.
#[derive(Default)]
pub struct MetadataBus {
    subs: Arc<SubList>,
    next_id: AtomicU64,
}

impl MetadataBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a decoded payload to every matching subscription.
    ///
    /// Synchronous and fire-and-forget: validation failures and duplicate
    /// signatures drop the event for that subscription only, and a panicking
    /// subscriber never affects the publisher or other subscribers.
    pub fn publish(&self, event: &TypedEvent) {
        // Snapshot so a handler that subscribes/unsubscribes cannot deadlock.
        let matching: Vec<Arc<SubEntry>> = self
            .subs
            .read()
            .iter()
            .filter(|entry| entry.event_type == event.event_type)
            .cloned()
            .collect();

        if matching.is_empty() {
            debug!(event_type = %event.event_type, "No subscribers for event");
            return;
        }

        for entry in matching {
            if let (Some(filter), Some(session_id)) = (&entry.session_filter, event.session_id()) {
                if filter != session_id {
                    debug!(
                        event_type = %event.event_type,
                        session_id = %session_id,
                        "Dropping event scoped to another session"
                    );
                    continue;
                }
            }
            (entry.deliver)(event, &entry.last_signature);
        }
    }

    /// Register a typed handler for one event type. Returns a guard that
    /// unsubscribes on drop.
    pub fn subscribe<T, F>(
        &self,
        event_type: &str,
        opts: SubscribeOptions,
        handler: F,
    ) -> SubscriptionGuard
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(event_type, opts, make_deliver::<T, _>(None, handler))
    }

    /// Like [`subscribe`](Self::subscribe), with at-most-once delivery per
    /// distinct signature. Both transports may carry the same logical event;
    /// the signature, not arrival order, decides what is a duplicate.
    pub fn subscribe_deduped<T, S, F>(
        &self,
        event_type: &str,
        opts: SubscribeOptions,
        signature: S,
        handler: F,
    ) -> SubscriptionGuard
    where
        T: DeserializeOwned + 'static,
        S: Fn(&T) -> String + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(
            event_type,
            opts,
            make_deliver::<T, _>(Some(Box::new(signature)), handler),
        )
    }

    fn register(
        &self,
        event_type: &str,
        opts: SubscribeOptions,
        deliver: Deliver,
    ) -> SubscriptionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(SubEntry {
            id,
            event_type: event_type.to_string(),
            session_filter: opts.session_id,
            last_signature: Mutex::new(None),
            deliver,
        });
        self.subs.write().push(entry);
        debug!(event_type = %event_type, subscription_id = id, "Subscriber registered");

        SubscriptionGuard {
            subs: Arc::downgrade(&self.subs),
            id,
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }
}

type SignatureFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

fn make_deliver<T, F>(signature: Option<SignatureFn<T>>, handler: F) -> Deliver
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    Box::new(move |event, last_signature| {
        let payload: T = match serde_json::from_value(event.payload().clone()) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(
                    event_type = %event.event_type(),
                    error = %err,
                    "Dropping event that failed schema validation for this subscriber"
                );
                return;
            }
        };

        if let Some(signature) = &signature {
            let sig = signature(&payload);
            let mut last = last_signature.lock();
            if last.as_deref() == Some(sig.as_str()) {
                debug!(
                    event_type = %event.event_type(),
                    signature = %sig,
                    "Dropping duplicate event"
                );
                return;
            }
            *last = Some(sig);
        }

        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            warn!(
                event_type = %event.event_type(),
                "Subscriber panicked while handling event"
            );
        }
    })
}

/// Disposer for a bus subscription; dropping it unsubscribes.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    subs: Weak<SubList>,
    id: u64,
}

impl SubscriptionGuard {
    /// Explicitly unsubscribe (equivalent to dropping the guard).
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subs) = self.subs.upgrade() {
            subs.write().retain(|entry| entry.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{OfferVisibility, SessionUpdate, OFFER_VISIBILITY, SESSION_UPDATE};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn offer_event(session_id: &str, visible: bool) -> TypedEvent {
        TypedEvent::new(
            OFFER_VISIBILITY,
            json!({"session_id": session_id, "visible": visible}),
        )
    }

    #[test]
    fn identical_signatures_are_delivered_at_most_once() {
        let bus = MetadataBus::new();
        let deduped = Arc::new(AtomicUsize::new(0));
        let plain = Arc::new(AtomicUsize::new(0));

        let deduped_count = deduped.clone();
        let _deduped_sub = bus.subscribe_deduped(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            |offer: &OfferVisibility| format!("{}:{}", offer.session_id, offer.visible),
            move |_: OfferVisibility| {
                deduped_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        let plain_count = plain.clone();
        let _plain_sub = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            move |_: OfferVisibility| {
                plain_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        let event = offer_event("s1", true);
        bus.publish(&event);
        bus.publish(&event);

        assert_eq!(deduped.load(Ordering::SeqCst), 1);
        assert_eq!(plain.load(Ordering::SeqCst), 2);

        // A different signature is a new logical event.
        bus.publish(&offer_event("s1", false));
        assert_eq!(deduped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn schema_failure_is_isolated_to_one_event_type() {
        let bus = MetadataBus::new();
        let sessions = Arc::new(AtomicUsize::new(0));
        let offers = Arc::new(AtomicUsize::new(0));

        let session_count = sessions.clone();
        let _session_sub = bus.subscribe(
            SESSION_UPDATE,
            SubscribeOptions::default(),
            move |_: SessionUpdate| {
                session_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        let offer_count = offers.clone();
        let _offer_sub = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            move |_: OfferVisibility| {
                offer_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Malformed for SessionUpdate's schema: dropped for that subscriber only.
        bus.publish(&TypedEvent::new(SESSION_UPDATE, json!({"status": 42})));
        bus.publish(&offer_event("s1", true));

        assert_eq!(sessions.load(Ordering::SeqCst), 0);
        assert_eq!(offers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_filter_drops_mismatches_but_passes_unscoped_events() {
        let bus = MetadataBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let count = delivered.clone();
        let _sub = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::for_session("s1"),
            move |_: OfferVisibility| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(&offer_event("s2", true));
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        bus.publish(&offer_event("s1", true));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_affect_others() {
        let bus = MetadataBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            |_: OfferVisibility| panic!("subscriber bug"),
        );

        let count = delivered.clone();
        let _good = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            move |_: OfferVisibility| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.publish(&offer_event("s1", true));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let bus = MetadataBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let count = delivered.clone();
        let sub = bus.subscribe(
            OFFER_VISIBILITY,
            SubscribeOptions::default(),
            move |_: OfferVisibility| {
                count.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(&offer_event("s1", true));
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(&offer_event("s1", false));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cue_json_decodes_type_and_payload() {
        let cue = json!({
            "type": OFFER_VISIBILITY,
            "payload": {"session_id": "s1", "visible": true}
        });

        let event = TypedEvent::from_cue_json(&cue).expect("should decode");
        assert_eq!(event.event_type(), OFFER_VISIBILITY);
        assert_eq!(event.session_id(), Some("s1"));

        assert!(TypedEvent::from_cue_json(&json!("not a cue")).is_err());
        assert!(TypedEvent::from_cue_json(&json!({"payload": {}})).is_err());
    }
}
