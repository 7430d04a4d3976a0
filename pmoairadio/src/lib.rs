//! # pmoairadio - Shuffled-playlist HLS radio with spoken intros
//!
//! `pmoairadio` turns a directory of audio files into an endless internet
//! radio. The playlist is shuffled once per pass and played forever; each
//! track is transcoded by a single supervised `ffmpeg` process into a rolling
//! HLS playlist, and a skip request cancels the current track at any time.
//! While a track plays, a background task prepares a short spoken intro for
//! the next one (LLM text, then speech synthesis) and hands it over through
//! an atomic rename.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmoairadio::{AiRadioExt, RadioStation};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = pmoserver::ServerBuilder::new_configured().build();
//!     server.init_logging().await;
//!
//!     let mut station = RadioStation::from_config().await?;
//!     server.init_ai_radio(&station).await;
//!
//!     server.start().await;
//!     station.start(server.shutdown_token());
//!     server.wait().await;
//!     station.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`rotator`]: shuffled passes over the track set
//! - [`supervisor`]: the single in-flight transcoding session, start/cancel
//! - [`transcoder`]: the `ffmpeg` HLS command line and segment hygiene
//! - [`handoff`]: staging, publication and claim of intros
//! - [`intro`]: LLM + TTS intro production
//! - [`metadata`]: display labels from audio tags
//! - [`playback`]: the loop tying everything together
//! - [`api`]: REST control (skip) and status endpoints
//!
//! ## Invariants
//!
//! - At most one transcoding process runs at any time; a skip that arrives
//!   while a session is being launched is never lost.
//! - An intro is either absent or complete at the handoff path, and it is
//!   played at most once, only for the track it was produced for.
//! - Intro failures never stop the music: the track plays without one.

pub mod api;
pub mod config;
pub mod config_ext;
pub mod error;
pub mod handoff;
pub mod intro;
pub mod library;
pub mod metadata;
pub mod playback;
pub mod pmoserver_ext;
pub mod rotator;
pub mod station;
pub mod supervisor;
pub mod track;
pub mod transcoder;
pub mod transliterate;

pub use api::{create_api_router, RadioApiDoc, RadioApiState};
pub use config::{IntroConfig, LlmConfig, RadioConfig, TranscoderConfig, TtsConfig};
pub use config_ext::AiRadioConfigExt;
pub use error::{
    Error, HandoffError, IntroError, LaunchError, PlaylistError, Result, SupervisorError,
};
pub use handoff::{IntroArtifact, IntroHandoff, IntroTicket};
pub use intro::{IntroProducer, SpeechIntroProducer};
pub use library::{MusicLibrary, StaticTracks, TrackSource};
pub use metadata::{FfprobeResolver, FileNameResolver, LoftyResolver, MetadataResolver};
pub use playback::{
    PlaybackEvent, PlaybackLoop, PlaybackOptions, PlaybackStatus, PlaylistSnapshot, RecentTrack,
};
pub use pmoserver_ext::AiRadioExt;
pub use rotator::{Lookahead, PlaylistRotator};
pub use station::{RadioStation, StationDirs};
pub use supervisor::{
    JobExit, Outcome, ProcessSupervisor, SessionSnapshot, SessionState, SupervisorStatus,
    TranscodeJob, TranscodeRequest, Transcoder,
};
pub use track::Track;
pub use transcoder::{FfmpegTranscoder, INDEX_FILE};
pub use transliterate::transliterate;
