//! Error types for the radio core

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, Error>;

/// The rotator has nothing to offer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaylistError {
    /// No track in the current set
    #[error("playlist is empty")]
    Empty,

    /// The given track is not part of the current pass
    #[error("track not in current pass: {0}")]
    UnknownTrack(PathBuf),
}

/// Caller-contract violations of the process supervisor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// A session is already recorded; overwriting it would break the
    /// single-process invariant
    #[error("a playback session is already active (session {current})")]
    SessionBusy { current: u64 },

    /// `shutdown` was called, no new session is accepted
    #[error("supervisor is shutting down")]
    ShuttingDown,
}

/// The transcoding process could not be started
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input file not found: {}", .0.display())]
    MissingInput(PathBuf),
}

/// Intro production failures. Never propagated past the handoff.
#[derive(Debug, thiserror::Error)]
pub enum IntroError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech service answered with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("intro production timed out after {0:?}")]
    Timeout(Duration),

    #[error("speech service returned an empty body")]
    EmptyAudio,
}

/// Filesystem failures while publishing or claiming an intro
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("handoff IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HandoffError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the radio crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Intro(#[from] IntroError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
