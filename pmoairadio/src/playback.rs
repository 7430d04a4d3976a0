//! Playback loop: rotates the playlist forever, one supervised session at a
//! time.
//!
//! For every track the loop:
//!
//! 1. claims the intro published for it (if any),
//! 2. computes the lookahead and starts preparing its intro in the background,
//! 3. hands the track to the [`ProcessSupervisor`] and waits for the outcome,
//! 4. cleans up and moves to the lookahead, whatever the outcome was.
//!
//! The track set is re-read from the [`TrackSource`] at every pass boundary
//! and, while the playlist is empty, every `idle_poll`.

use crate::error::{PlaylistError, SupervisorError};
use crate::handoff::IntroHandoff;
use crate::intro::IntroProducer;
use crate::library::TrackSource;
use crate::rotator::{Lookahead, PlaylistRotator};
use crate::supervisor::{Outcome, ProcessSupervisor};
use crate::track::Track;
use crate::transcoder::prune_stale_segments;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

/// Evènements émis par la boucle de lecture
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// A freshly shuffled pass starts playing
    PassStarted { pass: u64, tracks: usize },
    TrackStarted { track: Track, with_intro: bool },
    TrackEnded { track: Track, outcome: Outcome },
    /// Nothing to play, the loop sleeps before the next scan
    Idle,
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub idle_poll: Duration,
    pub intro_timeout: Duration,
    /// Pruned after every session when set
    pub segments_dir: Option<PathBuf>,
    pub recent_tracks: usize,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(5),
            intro_timeout: Duration::from_secs(90),
            segments_dir: None,
            recent_tracks: 20,
        }
    }
}

/// Vue de la passe en cours
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct PlaylistSnapshot {
    pub pass: u64,
    pub sequence: Vec<Track>,
    /// Index of the playing track in `sequence`
    pub position: Option<usize>,
    pub current: Option<Track>,
    pub upcoming: Option<Track>,
}

/// A finished session
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecentTrack {
    pub track: Track,
    pub outcome: Outcome,
    pub ended_at: DateTime<Utc>,
}

#[derive(Default)]
struct StatusInner {
    playlist: PlaylistSnapshot,
    recent: VecDeque<RecentTrack>,
}

/// Shared, read-only handle on what the loop is doing
#[derive(Clone, Default)]
pub struct PlaybackStatus {
    inner: Arc<RwLock<StatusInner>>,
}

impl PlaybackStatus {
    pub async fn playlist(&self) -> PlaylistSnapshot {
        self.inner.read().await.playlist.clone()
    }

    /// Most recent first
    pub async fn recent(&self) -> Vec<RecentTrack> {
        self.inner.read().await.recent.iter().cloned().collect()
    }

    pub(crate) async fn set_playlist(&self, playlist: PlaylistSnapshot) {
        self.inner.write().await.playlist = playlist;
    }

    pub(crate) async fn set_upcoming(&self, upcoming: Option<Track>) {
        self.inner.write().await.playlist.upcoming = upcoming;
    }

    pub(crate) async fn push_recent(&self, entry: RecentTrack, capacity: usize) {
        let mut inner = self.inner.write().await;
        inner.playlist.current = None;
        inner.playlist.position = None;
        inner.recent.push_front(entry);
        inner.recent.truncate(capacity);
    }
}

pub struct PlaybackLoop {
    source: Arc<dyn TrackSource>,
    supervisor: Arc<ProcessSupervisor>,
    handoff: Arc<IntroHandoff>,
    producer: Option<Arc<dyn IntroProducer>>,
    options: PlaybackOptions,
    rotator: PlaylistRotator,
    status: PlaybackStatus,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackLoop {
    pub fn new(
        source: Arc<dyn TrackSource>,
        supervisor: Arc<ProcessSupervisor>,
        handoff: Arc<IntroHandoff>,
        producer: Option<Arc<dyn IntroProducer>>,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            source,
            supervisor,
            handoff,
            producer,
            options,
            rotator: PlaylistRotator::new(),
            status: PlaybackStatus::default(),
            events: broadcast::channel(256).0,
        }
    }

    /// Remplace le générateur de permutations (graine fixe dans les tests)
    pub fn with_rotator(mut self, rotator: PlaylistRotator) -> Self {
        self.rotator = rotator;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status.clone()
    }

    fn emit(&self, event: PlaybackEvent) {
        // pas d'abonné : rien à faire
        let _ = self.events.send(event);
    }

    /// Runs until `shutdown` is cancelled. Cancelling also shuts the
    /// supervisor down, which kills the current session.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let watcher = {
            let supervisor = self.supervisor.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                supervisor.shutdown();
            })
        };

        info!("Playback loop started");
        let mut current: Option<Lookahead> = None;

        while !shutdown.is_cancelled() {
            let entry = match current.take() {
                Some(entry) => entry,
                None => match self.start_pass().await {
                    Some(entry) => entry,
                    None => {
                        self.idle(&shutdown).await;
                        continue;
                    }
                },
            };

            match self.play(entry).await {
                Ok(next) => current = next,
                Err(SupervisorError::ShuttingDown) => break,
                Err(e @ SupervisorError::SessionBusy { .. }) => {
                    error!("Cannot start playback: {}", e);
                    sleep_or_cancel(self.options.idle_poll, &shutdown).await;
                }
            }
        }

        watcher.abort();
        self.supervisor.shutdown();
        info!("Playback loop stopped");
    }

    /// Scans the source and shuffles a new pass
    async fn start_pass(&mut self) -> Option<Lookahead> {
        let tracks = self.source.tracks().await;
        self.rotator.reset(tracks);
        match self.rotator.shuffle_for_new_pass() {
            Ok(sequence) => sequence.first().cloned().map(|track| Lookahead {
                track,
                new_pass: true,
            }),
            Err(_) => None,
        }
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        debug!(poll = ?self.options.idle_poll, "Playlist is empty, waiting for tracks");
        self.status.set_playlist(PlaylistSnapshot::default()).await;
        self.emit(PlaybackEvent::Idle);
        sleep_or_cancel(self.options.idle_poll, shutdown).await;
    }

    /// Plays one track and returns what to play next (`None` to rescan)
    async fn play(&mut self, entry: Lookahead) -> Result<Option<Lookahead>, SupervisorError> {
        let track = entry.track;
        let pass = self.rotator.pass_number();

        if entry.new_pass {
            let count = self.rotator.sequence().map(<[Track]>::len).unwrap_or(0);
            info!(pass, tracks = count, "New playlist pass");
            self.emit(PlaybackEvent::PassStarted { pass, tracks: count });
        }

        self.status
            .set_playlist(PlaylistSnapshot {
                pass,
                sequence: self.rotator.sequence().map(<[Track]>::to_vec).unwrap_or_default(),
                position: self.rotator.position(&track),
                current: Some(track.clone()),
                upcoming: None,
            })
            .await;

        // l'intro de ce morceau doit être réclamée avant de préparer la suivante
        let intro = self.handoff.claim(&track);

        let with_intro = intro.is_some();
        info!(track = %track, with_intro, "Now playing");
        self.emit(PlaybackEvent::TrackStarted {
            track: track.clone(),
            with_intro,
        });

        // le rescan de fin de passe tourne pendant que le morceau joue
        let supervisor = self.supervisor.clone();
        let (started, lookahead) = tokio::join!(
            supervisor.start(&track, intro.map(|artifact| artifact.audio_path)),
            self.prepare_next(&track),
        );
        self.handoff.release_claimed();
        let outcome = started?;

        if let Some(dir) = &self.options.segments_dir {
            if let Err(e) = prune_stale_segments(dir).await {
                warn!(dir = %dir.display(), "Cannot prune segments: {}", e);
            }
        }

        self.status
            .push_recent(
                RecentTrack {
                    track: track.clone(),
                    outcome: outcome.clone(),
                    ended_at: Utc::now(),
                },
                self.options.recent_tracks,
            )
            .await;
        self.emit(PlaybackEvent::TrackEnded { track, outcome });

        Ok(lookahead)
    }

    /// Computes the lookahead and starts its intro production
    async fn prepare_next(&mut self, track: &Track) -> Option<Lookahead> {
        let lookahead = self.lookahead(track).await;
        self.status
            .set_upcoming(lookahead.as_ref().map(|l| l.track.clone()))
            .await;

        if let (Some(next), Some(producer)) = (&lookahead, &self.producer) {
            // tâche détachée : une production tardive est écartée par le handoff
            drop(
                self.handoff
                    .prepare(&next.track, producer.clone(), self.options.intro_timeout),
            );
        }
        lookahead
    }

    /// Next track; at the end of a pass the source is rescanned first
    async fn lookahead(&mut self, track: &Track) -> Option<Lookahead> {
        if self.rotator.is_last(track) {
            let tracks = self.source.tracks().await;
            self.rotator.reset(tracks);
        }

        match self.rotator.next(track) {
            Ok(next) => Some(next),
            Err(PlaylistError::Empty) => {
                info!("Music library is empty, rotation stops after this track");
                None
            }
            Err(e) => {
                warn!("Cannot compute next track: {}", e);
                None
            }
        }
    }
}

async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
