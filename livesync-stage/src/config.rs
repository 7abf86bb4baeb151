//! Stage policy configuration

use serde::{Deserialize, Serialize};

use crate::types::ParticipantId;

/// Stage policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Explicitly configured main presenter; wins over host discovery
    /// whenever it is set, even if that id is absent from the roster.
    pub configured_presenter_id: Option<ParticipantId>,

    /// Id substring that marks a participant as the host when no explicit
    /// presenter is configured. Upstream rosters encode the host role in the
    /// participant id; prefer `configured_presenter_id` where the roster
    /// carries an explicit role instead.
    pub host_id_marker: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            configured_presenter_id: None,
            host_id_marker: "host-".to_string(),
        }
    }
}

impl StageConfig {
    #[must_use]
    pub fn with_presenter(presenter_id: impl Into<ParticipantId>) -> Self {
        Self {
            configured_presenter_id: Some(presenter_id.into()),
            ..Self::default()
        }
    }
}
