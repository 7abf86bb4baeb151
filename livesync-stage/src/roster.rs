//! Stage roster types
//!
//! The roster is owned by the calling stage session; the policy only reads
//! it. Roster entries are replaced wholesale on every update, so anything
//! comparing entries must compare identity and track set, never references.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{ParticipantId, TrackId};

/// Declared role of a stage participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Presenter,
    Attendee,
}

impl Role {
    /// Only hosts and presenters ever publish media.
    #[must_use]
    pub const fn can_publish(self) -> bool {
        matches!(self, Self::Host | Self::Presenter)
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub muted: bool,
}

/// One remote participant as reported by the real-time transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: Role,
    pub tracks: Vec<MediaTrack>,
}

impl Participant {
    #[must_use]
    pub fn new(id: impl Into<ParticipantId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tracks(mut self, tracks: Vec<MediaTrack>) -> Self {
        self.tracks = tracks;
        self
    }

    /// Track ids as a set, for order-insensitive comparison.
    #[must_use]
    pub fn track_ids(&self) -> BTreeSet<&TrackId> {
        self.tracks.iter().map(|track| &track.id).collect()
    }

    /// Identity-and-track-set equality; roster entries are replaced
    /// wholesale on every update, so reference comparison is meaningless.
    #[must_use]
    pub fn same_identity_and_tracks(&self, other: &Self) -> bool {
        self.id == other.id && self.track_ids() == other.track_ids()
    }
}
