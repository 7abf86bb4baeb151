//! Typed live-session event payloads
//!
//! These are the known signals carried by the push channel and by in-band
//! video metadata cues. Deserialization into these types is the per-event
//! schema: a payload that does not parse is dropped for that subscriber, it
//! is never a bus-wide failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle changed (`{status}`)
pub const SESSION_UPDATE: &str = "webinar:session:update";
/// Commerce offer shown or hidden (`{session_id, visible, shown_at?}`)
pub const OFFER_VISIBILITY: &str = "webinar:offer:visibility";
/// Offer scarcity counters changed (`{session_id, spots_left?, ends_at?}`)
pub const OFFER_SCARCITY_UPDATE: &str = "session:offer:scarcity:update";
/// Secondary-video overlay started or stopped
pub const VIDEO_INJECTION_UPDATE: &str = "webinar:video-injection:update";

/// Event names the session layer bridges from the push channel onto the bus.
pub const BRIDGED_EVENTS: [&str; 4] = [
    SESSION_UPDATE,
    OFFER_VISIBILITY,
    OFFER_SCARCITY_UPDATE,
    VIDEO_INJECTION_UPDATE,
];

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Waiting,
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferVisibility {
    pub session_id: String,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shown_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferScarcityUpdate {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spots_left: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionAction {
    Start,
    Stop,
}

/// Secondary video injected over the main broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInjectionUpdate {
    pub session_id: String,
    pub action: InjectionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_injection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_uses_snake_case_on_the_wire() {
        let update: SessionUpdate =
            serde_json::from_str(r#"{"status":"live"}"#).expect("should parse");
        assert_eq!(update.status, SessionStatus::Live);

        assert!(serde_json::from_str::<SessionUpdate>(r#"{"status":"LIVE"}"#).is_err());
    }

    #[test]
    fn offer_visibility_shown_at_is_optional() {
        let offer: OfferVisibility =
            serde_json::from_str(r#"{"session_id":"s1","visible":true}"#).expect("should parse");
        assert!(offer.visible);
        assert!(offer.shown_at.is_none());

        let offer: OfferVisibility = serde_json::from_str(
            r#"{"session_id":"s1","visible":true,"shown_at":"2024-05-01T12:00:00Z"}"#,
        )
        .expect("should parse");
        assert!(offer.shown_at.is_some());
    }

    #[test]
    fn injection_update_parses_start_and_stop() {
        let start: VideoInjectionUpdate = serde_json::from_str(
            r#"{"session_id":"s1","action":"start","video_injection_id":"v1","playback_url":"https://cdn.example/v1.m3u8","duration_ms":15000}"#,
        )
        .expect("should parse");
        assert_eq!(start.action, InjectionAction::Start);
        assert_eq!(start.duration_ms, Some(15_000));

        let stop: VideoInjectionUpdate =
            serde_json::from_str(r#"{"session_id":"s1","action":"stop"}"#).expect("should parse");
        assert_eq!(stop.action, InjectionAction::Stop);
        assert!(stop.video_injection_id.is_none());
    }
}
