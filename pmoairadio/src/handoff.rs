//! Intro handoff between the background producer and the playback loop.
//!
//! The producer writes into a private staging file. Publication is a single
//! `rename` of that file onto the well-known handoff path, done under the
//! handoff lock together with the record of which track it is for. The
//! consumer claims it (again a `rename`, to the path the next invocation
//! reads) under the same lock. A reader therefore sees either no intro or a
//! complete one, and each published intro is claimed at most once.
//!
//! Only the most recent preparation may publish: a slow producer for an
//! earlier track cannot overwrite the intro prepared for a later one.

use crate::error::{HandoffError, IntroError};
use crate::intro::IntroProducer;
use crate::track::Track;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

const HANDOFF_FILE: &str = "next_intro.wav";
const CLAIMED_FILE: &str = "current_intro.wav";
const STAGING_DIR: &str = "staging";

/// An intro produced for a given track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IntroArtifact {
    pub for_track: Track,
    #[schema(value_type = String)]
    pub audio_path: PathBuf,
    /// `false` when production failed, timed out or was superseded
    pub ready: bool,
}

/// One production attempt; only the latest ticket may publish
#[derive(Debug)]
pub struct IntroTicket {
    id: u64,
    track: Track,
    staging: PathBuf,
}

impl IntroTicket {
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Private file the producer writes to
    pub fn staging_path(&self) -> &Path {
        &self.staging
    }
}

#[derive(Default)]
struct HandoffState {
    latest_ticket: u64,
    published: Option<IntroArtifact>,
}

pub struct IntroHandoff {
    staging_dir: PathBuf,
    handoff_path: PathBuf,
    claimed_path: PathBuf,
    state: Mutex<HandoffState>,
}

fn remove_if_exists(path: &Path) -> Result<bool, HandoffError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HandoffError::io(path, e)),
    }
}

impl IntroHandoff {
    /// Uses `work_dir` for staging, handoff and claimed files. It must not be
    /// a served directory.
    pub fn new(work_dir: impl Into<PathBuf>) -> Result<Self, HandoffError> {
        let work_dir = work_dir.into();
        let staging_dir = work_dir.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_dir).map_err(|e| HandoffError::io(&staging_dir, e))?;

        Ok(Self {
            handoff_path: work_dir.join(HANDOFF_FILE),
            claimed_path: work_dir.join(CLAIMED_FILE),
            staging_dir,
            state: Mutex::new(HandoffState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, HandoffState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handoff_path(&self) -> &Path {
        &self.handoff_path
    }

    pub fn claimed_path(&self) -> &Path {
        &self.claimed_path
    }

    /// Starts a production attempt for `track`, superseding earlier ones
    pub fn begin(&self, track: &Track) -> IntroTicket {
        let mut state = self.state();
        state.latest_ticket += 1;
        let id = state.latest_ticket;
        IntroTicket {
            id,
            track: track.clone(),
            staging: self.staging_dir.join(format!("intro-{id}.part")),
        }
    }

    /// Commits a fully written staging file. Returns `false` (and discards
    /// the file) if a newer attempt has started since `ticket` was issued.
    pub fn publish(&self, ticket: &IntroTicket) -> Result<bool, HandoffError> {
        let mut state = self.state();
        if ticket.id != state.latest_ticket {
            drop(state);
            remove_if_exists(&ticket.staging)?;
            debug!(track = %ticket.track, "Superseded intro discarded");
            return Ok(false);
        }

        std::fs::rename(&ticket.staging, &self.handoff_path)
            .map_err(|e| HandoffError::io(&ticket.staging, e))?;
        state.published = Some(IntroArtifact {
            for_track: ticket.track.clone(),
            audio_path: self.handoff_path.clone(),
            ready: true,
        });
        Ok(true)
    }

    /// Records a failed attempt; its staging file is removed and never
    /// becomes visible at the handoff path.
    pub fn record_failure(&self, ticket: &IntroTicket) {
        if let Err(e) = remove_if_exists(&ticket.staging) {
            warn!("Cannot remove intro staging file: {}", e);
        }

        let mut state = self.state();
        if ticket.id == state.latest_ticket {
            if let Err(e) = remove_if_exists(&self.handoff_path) {
                warn!("Cannot remove stale intro: {}", e);
            }
            state.published = Some(IntroArtifact {
                for_track: ticket.track.clone(),
                audio_path: self.handoff_path.clone(),
                ready: false,
            });
        }
    }

    /// Takes the published intro for `track`, moving it to the claimed path.
    ///
    /// Returns `None` when no intro is ready for this track. An intro
    /// published for another track is stale and discarded.
    pub fn claim(&self, track: &Track) -> Option<IntroArtifact> {
        let mut state = self.state();
        let published = state.published.take();

        match published {
            Some(artifact) if artifact.for_track.path == track.path && artifact.ready => {
                if !self.handoff_path.exists() {
                    warn!(track = %track, "Published intro is missing on disk");
                    return None;
                }
                match std::fs::rename(&self.handoff_path, &self.claimed_path) {
                    Ok(()) => Some(IntroArtifact {
                        for_track: artifact.for_track,
                        audio_path: self.claimed_path.clone(),
                        ready: true,
                    }),
                    Err(e) => {
                        warn!(track = %track, "Cannot claim intro: {}", e);
                        None
                    }
                }
            }
            Some(artifact) if artifact.for_track.path == track.path => {
                debug!(track = %track, "No intro available (production failed)");
                None
            }
            Some(artifact) => {
                info!(
                    stale_for = %artifact.for_track,
                    track = %track,
                    "Discarding intro prepared for another track"
                );
                if let Err(e) = remove_if_exists(&self.handoff_path) {
                    warn!("Cannot remove stale intro: {}", e);
                }
                None
            }
            None => {
                // fichier orphelin (redémarrage, crash du producteur)
                if let Ok(true) = remove_if_exists(&self.handoff_path) {
                    debug!("Removed unrecorded intro file");
                }
                None
            }
        }
    }

    /// Deletes the intro used by the session that just ended
    pub fn release_claimed(&self) {
        if let Err(e) = remove_if_exists(&self.claimed_path) {
            warn!("Cannot remove played intro: {}", e);
        }
    }

    /// Removes every intro file; used at startup
    pub fn reset(&self) -> Result<(), HandoffError> {
        let mut state = self.state();
        state.published = None;
        remove_if_exists(&self.handoff_path)?;
        remove_if_exists(&self.claimed_path)?;

        let entries =
            std::fs::read_dir(&self.staging_dir).map_err(|e| HandoffError::io(&self.staging_dir, e))?;
        for entry in entries.flatten() {
            remove_if_exists(&entry.path())?;
        }
        Ok(())
    }

    /// Intro currently waiting to be claimed (or the last failure)
    pub fn pending(&self) -> Option<IntroArtifact> {
        self.state().published.clone()
    }

    /// Produces the intro for `track` in a supervised background task.
    ///
    /// The task never fails: errors and timeouts are logged and recorded as
    /// a not-ready artifact.
    pub fn prepare(
        self: &Arc<Self>,
        track: &Track,
        producer: Arc<dyn IntroProducer>,
        timeout: Duration,
    ) -> JoinHandle<IntroArtifact> {
        let ticket = self.begin(track);
        let handoff = self.clone();

        tokio::spawn(async move {
            let label = ticket.track.display_label.clone();
            let produced =
                tokio::time::timeout(timeout, producer.produce(&label, ticket.staging_path())).await;

            let error = match produced {
                Ok(Ok(())) => match handoff.publish(&ticket) {
                    Ok(ready) => {
                        if ready {
                            info!(track = %ticket.track, "Intro ready");
                        }
                        return IntroArtifact {
                            for_track: ticket.track.clone(),
                            audio_path: handoff.handoff_path.clone(),
                            ready,
                        };
                    }
                    Err(e) => e.to_string(),
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => IntroError::Timeout(timeout).to_string(),
            };

            warn!(track = %ticket.track, "Intro production failed: {}", error);
            handoff.record_failure(&ticket);
            IntroArtifact {
                for_track: ticket.track.clone(),
                audio_path: handoff.handoff_path.clone(),
                ready: false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;

    fn track(name: &str) -> Track {
        Track::new(format!("/music/{name}.mp3"), name)
    }

    fn write_staging(ticket: &IntroTicket, content: &[u8]) {
        std::fs::write(ticket.staging_path(), content).unwrap();
    }

    /// Writes half the payload, then stalls or fails
    struct InterruptedProducer {
        fail: bool,
    }

    #[async_trait]
    impl IntroProducer for InterruptedProducer {
        async fn produce(&self, _label: &str, staging: &Path) -> Result<(), IntroError> {
            let mut file = tokio::fs::File::create(staging).await?;
            file.write_all(b"RIFF-half").await?;
            file.flush().await?;
            if self.fail {
                return Err(IntroError::Status(503));
            }
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct QuickProducer;

    #[async_trait]
    impl IntroProducer for QuickProducer {
        async fn produce(&self, label: &str, staging: &Path) -> Result<(), IntroError> {
            tokio::fs::write(staging, format!("intro for {label}")).await?;
            Ok(())
        }
    }

    #[test]
    fn nothing_published_means_no_intro() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();
        assert!(handoff.claim(&track("a")).is_none());
        assert!(!handoff.handoff_path().exists());
    }

    #[test]
    fn publish_then_claim_moves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();

        let ticket = handoff.begin(&track("b"));
        write_staging(&ticket, b"complete intro");
        assert!(handoff.publish(&ticket).unwrap());
        assert!(handoff.handoff_path().exists());
        assert!(!ticket.staging_path().exists());

        let claimed = handoff.claim(&track("b")).unwrap();
        assert!(claimed.ready);
        assert_eq!(claimed.audio_path, handoff.claimed_path());
        assert_eq!(std::fs::read(&claimed.audio_path).unwrap(), b"complete intro");
        assert!(!handoff.handoff_path().exists());

        handoff.release_claimed();
        assert!(!handoff.claimed_path().exists());
    }

    #[test]
    fn claim_is_at_most_once() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();

        let ticket = handoff.begin(&track("b"));
        write_staging(&ticket, b"intro");
        handoff.publish(&ticket).unwrap();

        assert!(handoff.claim(&track("b")).is_some());
        assert!(handoff.claim(&track("b")).is_none());
    }

    #[test]
    fn intro_for_another_track_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();

        let ticket = handoff.begin(&track("b"));
        write_staging(&ticket, b"intro");
        handoff.publish(&ticket).unwrap();

        assert!(handoff.claim(&track("c")).is_none());
        assert!(!handoff.handoff_path().exists());
        assert!(handoff.claim(&track("b")).is_none());
    }

    #[test]
    fn superseded_attempt_cannot_publish() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();

        let late = handoff.begin(&track("b"));
        let current = handoff.begin(&track("c"));
        write_staging(&current, b"intro c");
        write_staging(&late, b"intro b");

        assert!(handoff.publish(&current).unwrap());
        assert!(!handoff.publish(&late).unwrap());
        assert!(!late.staging_path().exists());

        let claimed = handoff.claim(&track("c")).unwrap();
        assert_eq!(std::fs::read(&claimed.audio_path).unwrap(), b"intro c");
    }

    #[tokio::test]
    async fn interrupted_write_is_never_visible() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = Arc::new(IntroHandoff::new(dir.path()).unwrap());

        for fail in [true, false] {
            let artifact = handoff
                .prepare(
                    &track("b"),
                    Arc::new(InterruptedProducer { fail }),
                    Duration::from_millis(50),
                )
                .await
                .unwrap();

            assert!(!artifact.ready);
            assert!(!handoff.handoff_path().exists());
            assert!(handoff.claim(&track("b")).is_none());
            assert_eq!(std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn prepared_intro_is_claimable() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = Arc::new(IntroHandoff::new(dir.path()).unwrap());

        let artifact = handoff
            .prepare(&track("b"), Arc::new(QuickProducer), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(artifact.ready);
        assert_eq!(handoff.pending().unwrap().for_track, track("b"));

        let claimed = handoff.claim(&track("b")).unwrap();
        assert_eq!(std::fs::read_to_string(claimed.audio_path).unwrap(), "intro for b");
    }

    #[test]
    fn reset_clears_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = IntroHandoff::new(dir.path()).unwrap();
        std::fs::write(handoff.handoff_path(), b"old").unwrap();
        std::fs::write(handoff.claimed_path(), b"old").unwrap();
        std::fs::write(dir.path().join(STAGING_DIR).join("intro-9.part"), b"half").unwrap();

        handoff.reset().unwrap();
        assert!(!handoff.handoff_path().exists());
        assert!(!handoff.claimed_path().exists());
        assert_eq!(std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count(), 0);
    }
}
