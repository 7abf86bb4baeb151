//! Stage roster policy for live sessions
//!
//! Decides, from a roster snapshot, which local tracks to publish, who the
//! main presenter is, and which remote streams to subscribe to. Pure logic
//! with no transport dependency; the session layer applies the decisions.

pub mod config;
pub mod policy;
pub mod roster;
pub mod types;

pub use config::StageConfig;
pub use policy::{PublishTracks, StageDecision, StagePolicy, SubscribeDecision, SubscriptionEntry};
pub use roster::{MediaTrack, Participant, Role, TrackKind};
pub use types::{ParticipantId, TrackId};
