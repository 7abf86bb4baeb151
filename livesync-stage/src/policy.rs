//! Stage publish/subscribe policy
//!
//! Pure decision logic over a roster snapshot: who publishes, who the main
//! presenter is, and which remote streams each participant subscribes to.
//! The policy never touches the transport; callers apply the returned
//! [`StageDecision`] to their media session.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StageConfig;
use crate::roster::{Participant, Role};
use crate::types::{ParticipantId, TrackId};

/// Whether to subscribe to a remote participant's streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeDecision {
    None,
    AudioVideo,
}

/// Local tracks to publish for the current role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishTracks {
    pub audio: Option<TrackId>,
    pub video: Option<TrackId>,
}

impl PublishTracks {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            audio: None,
            video: None,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// One evaluated subscription: the remote participant and the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub participant_id: ParticipantId,
    pub decision: SubscribeDecision,
}

/// Immutable outcome of one roster evaluation. Callers diff consecutive
/// decisions themselves; the policy holds no state between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecision {
    pub publish: PublishTracks,
    pub main_presenter: Option<Participant>,
    pub subscriptions: Vec<SubscriptionEntry>,
}

/// Roster-driven stage policy.
#[derive(Debug, Clone)]
pub struct StagePolicy {
    config: StageConfig,
}

impl StagePolicy {
    #[must_use]
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }

    /// Which local tracks the given role publishes. Attendees never publish,
    /// even when local capture tracks exist.
    #[must_use]
    pub fn tracks_to_publish(
        &self,
        role: Role,
        local_audio: Option<TrackId>,
        local_video: Option<TrackId>,
    ) -> PublishTracks {
        if role.can_publish() {
            PublishTracks {
                audio: local_audio,
                video: local_video,
            }
        } else {
            PublishTracks::none()
        }
    }

    /// Subscription verdict for one remote participant.
    ///
    /// Attendees follow the main presenter only; when no presenter has been
    /// selected they fall back to any participant whose id carries the host
    /// marker, so the stage stays watchable while the roster settles. Hosts
    /// and presenters subscribe to every publishing peer.
    #[must_use]
    pub fn should_subscribe(
        &self,
        self_role: Role,
        remote: &Participant,
        main_presenter: Option<&Participant>,
    ) -> SubscribeDecision {
        match self_role {
            Role::Attendee => match main_presenter {
                Some(presenter) if presenter.id == remote.id => SubscribeDecision::AudioVideo,
                Some(_) => SubscribeDecision::None,
                None if self.is_host_marked(&remote.id) => SubscribeDecision::AudioVideo,
                None => SubscribeDecision::None,
            },
            Role::Host | Role::Presenter => {
                if remote.role.can_publish() {
                    SubscribeDecision::AudioVideo
                } else {
                    SubscribeDecision::None
                }
            }
        }
    }

    /// Pick the main presenter out of a roster snapshot.
    ///
    /// A configured presenter id wins, but only if that participant is
    /// actually present; a stale configuration never resurrects an absent
    /// presenter. Otherwise the first host-marked participant is used. An
    /// empty roster simply yields no presenter.
    #[must_use]
    pub fn select_main_presenter<'a>(&self, roster: &'a [Participant]) -> Option<&'a Participant> {
        if let Some(configured) = &self.config.configured_presenter_id {
            let found = roster.iter().find(|p| &p.id == configured);
            if found.is_none() {
                debug!(presenter_id = %configured, "configured presenter absent from roster");
            }
            return found;
        }
        roster.iter().find(|p| self.is_host_marked(&p.id))
    }

    /// Whether the main presenter changed between two evaluations, by
    /// identity and track set rather than by reference.
    #[must_use]
    pub fn main_presenter_changed(
        &self,
        old: Option<&Participant>,
        new: Option<&Participant>,
    ) -> bool {
        match (old, new) {
            (None, None) => false,
            (Some(old), Some(new)) => !old.same_identity_and_tracks(new),
            _ => true,
        }
    }

    /// Evaluate the full roster into one decision value.
    #[must_use]
    pub fn evaluate(
        &self,
        self_id: &ParticipantId,
        self_role: Role,
        local_audio: Option<TrackId>,
        local_video: Option<TrackId>,
        roster: &[Participant],
    ) -> StageDecision {
        let main_presenter = self.select_main_presenter(roster);
        let subscriptions = roster
            .iter()
            .filter(|remote| &remote.id != self_id)
            .map(|remote| SubscriptionEntry {
                participant_id: remote.id.clone(),
                decision: self.should_subscribe(self_role, remote, main_presenter),
            })
            .collect();

        StageDecision {
            publish: self.tracks_to_publish(self_role, local_audio, local_video),
            main_presenter: main_presenter.cloned(),
            subscriptions,
        }
    }

    fn is_host_marked(&self, id: &ParticipantId) -> bool {
        !self.config.host_id_marker.is_empty()
            && id.as_str().contains(&self.config.host_id_marker)
    }
}
