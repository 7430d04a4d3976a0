//! Assemblage de la radio : bibliothèque, superviseur, handoff des intros et
//! boucle de lecture, construits depuis la configuration.

use crate::api::RadioApiState;
use crate::config::RadioConfig;
use crate::config_ext::AiRadioConfigExt;
use crate::handoff::IntroHandoff;
use crate::intro::{IntroProducer, SpeechIntroProducer};
use crate::library::{MusicLibrary, TrackSource};
use crate::metadata::{FfprobeResolver, LoftyResolver};
use crate::playback::{PlaybackEvent, PlaybackLoop, PlaybackOptions, PlaybackStatus};
use crate::supervisor::ProcessSupervisor;
use crate::transcoder::{reset_segments_dir, FfmpegTranscoder};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Répertoires utilisés par la radio
#[derive(Debug, Clone)]
pub struct StationDirs {
    pub music: PathBuf,
    /// Servi sous `/static`
    pub segments: PathBuf,
    /// Privé : staging et handoff des intros
    pub work: PathBuf,
}

impl StationDirs {
    pub fn from_pmoconfig() -> anyhow::Result<Self> {
        let config = pmoconfig::get_config();
        Ok(Self {
            music: config.get_radio_music_dir()?,
            segments: config.get_radio_segments_dir()?,
            work: config.get_radio_work_dir()?,
        })
    }
}

pub struct RadioStation {
    dirs: StationDirs,
    transcoder: Arc<FfmpegTranscoder>,
    supervisor: Arc<ProcessSupervisor>,
    handoff: Arc<IntroHandoff>,
    status: PlaybackStatus,
    playback: Option<PlaybackLoop>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<CancellationToken>,
}

impl RadioStation {
    /// Construit la radio et remet à zéro les répertoires de travail
    pub async fn new(config: RadioConfig, dirs: StationDirs) -> Result<Self> {
        reset_segments_dir(&dirs.segments).await?;

        let resolver = Arc::new(
            LoftyResolver::new()
                .with_ffprobe_fallback(FfprobeResolver::new(&config.transcoder.ffprobe_path)),
        );
        let source: Arc<dyn TrackSource> =
            Arc::new(MusicLibrary::new(&dirs.music, &config.extensions, resolver));

        let transcoder = Arc::new(FfmpegTranscoder::new(
            config.transcoder.clone(),
            &dirs.segments,
        ));
        let supervisor = Arc::new(ProcessSupervisor::new(transcoder.clone()));

        let handoff = Arc::new(IntroHandoff::new(&dirs.work)?);
        handoff.reset()?;

        let producer: Option<Arc<dyn IntroProducer>> = if config.intro.enabled {
            Some(Arc::new(SpeechIntroProducer::new(config.intro.clone())?))
        } else {
            info!("Spoken intros disabled");
            None
        };

        let playback = PlaybackLoop::new(
            source,
            supervisor.clone(),
            handoff.clone(),
            producer,
            PlaybackOptions {
                idle_poll: config.idle_poll(),
                intro_timeout: config.intro.timeout(),
                segments_dir: Some(dirs.segments.clone()),
                recent_tracks: config.recent_tracks,
            },
        );

        Ok(Self {
            dirs,
            transcoder,
            supervisor,
            handoff,
            status: playback.status(),
            playback: Some(playback),
            task: None,
            shutdown: None,
        })
    }

    /// Construit la radio depuis `pmoconfig`
    pub async fn from_config() -> anyhow::Result<Self> {
        let config = RadioConfig::load_from_pmoconfig()?;
        let dirs = StationDirs::from_pmoconfig()?;
        info!(
            music = %dirs.music.display(),
            segments = %dirs.segments.display(),
            "Radio directories"
        );
        Ok(Self::new(config, dirs).await?)
    }

    pub fn dirs(&self) -> &StationDirs {
        &self.dirs
    }

    pub fn segments_dir(&self) -> &Path {
        &self.dirs.segments
    }

    /// `true` si le binaire ffmpeg configuré répond
    pub async fn ffmpeg_available(&self) -> bool {
        self.transcoder.is_available().await
    }

    pub fn supervisor(&self) -> Arc<ProcessSupervisor> {
        self.supervisor.clone()
    }

    pub fn handoff(&self) -> Arc<IntroHandoff> {
        self.handoff.clone()
    }

    pub fn api_state(&self) -> RadioApiState {
        RadioApiState::new(self.supervisor.clone(), self.status.clone())
    }

    /// Abonnement aux évènements de lecture, avant [`RadioStation::start`]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<PlaybackEvent>> {
        self.playback.as_ref().map(PlaybackLoop::subscribe)
    }

    /// Lance la boucle de lecture. Sans effet si elle tourne déjà.
    ///
    /// La boucle s'arrête à l'annulation de `shutdown` ou à [`RadioStation::stop`].
    pub fn start(&mut self, shutdown: CancellationToken) -> bool {
        match self.playback.take() {
            Some(playback) => {
                let token = shutdown.child_token();
                self.task = Some(tokio::spawn(playback.run(token.clone())));
                self.shutdown = Some(token);
                true
            }
            None => {
                warn!("Playback loop already started");
                false
            }
        }
    }

    /// Arrête la boucle de lecture et attend sa fin
    pub async fn stop(&mut self) {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
        self.supervisor.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Playback loop ended abnormally: {}", e);
            }
        }
    }
}
