//! Background continuity strategy
//!
//! Keeping signal flowing while a viewer's tab is hidden can be done several
//! ways (drop video and keep audio, hand the video to a picture-in-picture
//! surface, or do nothing and rely on in-band metadata to catch up on return).
//! This module models that choice as a single configurable strategy with a
//! pure decision function, consumed by the player layer.

use serde::{Deserialize, Serialize};

/// How the player keeps playback alive while backgrounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityMode {
    /// No special handling; playback may be throttled by the platform
    #[default]
    None,
    /// Drop video rendering and keep the audio pipeline running
    AudioFallback,
    /// Move the video into a picture-in-picture surface
    PictureInPicture,
}

/// Page/tab visibility as reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// What the player layer should do in response to a visibility change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityDirective {
    Nothing,
    SwitchToAudioOnly,
    RestoreVideo,
    EnterPictureInPicture,
    ExitPictureInPicture,
}

/// Decide the player-side action for a visibility transition.
#[must_use]
pub const fn directive(mode: ContinuityMode, visibility: Visibility) -> ContinuityDirective {
    match (mode, visibility) {
        (ContinuityMode::None, _) => ContinuityDirective::Nothing,
        (ContinuityMode::AudioFallback, Visibility::Hidden) => {
            ContinuityDirective::SwitchToAudioOnly
        }
        (ContinuityMode::AudioFallback, Visibility::Visible) => ContinuityDirective::RestoreVideo,
        (ContinuityMode::PictureInPicture, Visibility::Hidden) => {
            ContinuityDirective::EnterPictureInPicture
        }
        (ContinuityMode::PictureInPicture, Visibility::Visible) => {
            ContinuityDirective::ExitPictureInPicture
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_mode_never_acts() {
        assert_eq!(
            directive(ContinuityMode::None, Visibility::Hidden),
            ContinuityDirective::Nothing
        );
        assert_eq!(
            directive(ContinuityMode::None, Visibility::Visible),
            ContinuityDirective::Nothing
        );
    }

    #[test]
    fn strategies_pair_hide_and_restore() {
        assert_eq!(
            directive(ContinuityMode::AudioFallback, Visibility::Hidden),
            ContinuityDirective::SwitchToAudioOnly
        );
        assert_eq!(
            directive(ContinuityMode::AudioFallback, Visibility::Visible),
            ContinuityDirective::RestoreVideo
        );
        assert_eq!(
            directive(ContinuityMode::PictureInPicture, Visibility::Hidden),
            ContinuityDirective::EnterPictureInPicture
        );
        assert_eq!(
            directive(ContinuityMode::PictureInPicture, Visibility::Visible),
            ContinuityDirective::ExitPictureInPicture
        );
    }
}
