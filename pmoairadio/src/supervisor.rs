//! Process supervisor: at most one transcoding job at a time.
//!
//! All access to the playback session goes through [`ProcessSupervisor::start`]
//! and [`ProcessSupervisor::cancel`]. The session is recorded under a single
//! lock *before* the job is launched, so a skip request either finds the
//! session (and cancels it) or arrives before anything was recorded.
//!
//! ```text
//!  start ──lock──► record(Starting) ──unlock──► launch ──► Running ──► wait ─┐
//!                                                                            │
//!  cancel ──lock──► take session, cancel token ─────────► kill ◄─────────────┘
//! ```

use crate::error::{LaunchError, SupervisorError};
use crate::track::Track;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utoipa::ToSchema;

/// What to play for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub session_id: u64,
    pub track: Track,
    /// Claimed intro to mix over the start of the track
    pub intro: Option<PathBuf>,
}

/// How a job ended on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobExit {
    Success,
    Failure(String),
}

/// A launched unit of work
#[async_trait]
pub trait TranscodeJob: Send {
    /// Waits until the job exits by itself
    async fn wait(&mut self) -> std::io::Result<JobExit>;

    /// Best-effort termination
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Launches jobs; launching must not block
pub trait Transcoder: Send + Sync {
    fn launch(&self, request: &TranscodeRequest) -> Result<Box<dyn TranscodeJob>, LaunchError>;
}

/// Result of one playback invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl Outcome {
    fn state(&self) -> SessionState {
        match self {
            Outcome::Completed => SessionState::Completed,
            Outcome::Cancelled => SessionState::Cancelled,
            Outcome::Failed(_) => SessionState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Read-only view of a playback session
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub id: u64,
    pub track: Track,
    pub state: SessionState,
    pub with_intro: bool,
    pub started_at: DateTime<Utc>,
}

/// Current session (if any) and the last finished one
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SupervisorStatus {
    pub state: SessionState,
    pub current: Option<SessionSnapshot>,
    pub last: Option<SessionSnapshot>,
}

struct ActiveSession {
    id: u64,
    track: Track,
    state: SessionState,
    with_intro: bool,
    started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl ActiveSession {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            track: self.track.clone(),
            state: self.state,
            with_intro: self.with_intro,
            started_at: self.started_at,
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    active: Option<ActiveSession>,
    last: Option<SessionSnapshot>,
    next_id: u64,
    closed: bool,
}

/// Owner of the single in-flight transcoding job
pub struct ProcessSupervisor {
    transcoder: Arc<dyn Transcoder>,
    slot: Mutex<SessionSlot>,
}

impl ProcessSupervisor {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            slot: Mutex::new(SessionSlot::default()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plays `track` (with `intro` mixed over its start when given) and
    /// returns once the job has exited or been killed.
    ///
    /// Fails without launching anything if a session is already recorded
    /// or if the supervisor has been shut down.
    pub async fn start(
        &self,
        track: &Track,
        intro: Option<PathBuf>,
    ) -> Result<Outcome, SupervisorError> {
        let (id, token) = {
            let mut slot = self.slot();
            if slot.closed {
                return Err(SupervisorError::ShuttingDown);
            }
            if let Some(active) = &slot.active {
                return Err(SupervisorError::SessionBusy { current: active.id });
            }

            slot.next_id += 1;
            let id = slot.next_id;
            let token = CancellationToken::new();
            slot.active = Some(ActiveSession {
                id,
                track: track.clone(),
                state: SessionState::Starting,
                with_intro: intro.is_some(),
                started_at: Utc::now(),
                token: token.clone(),
            });
            (id, token)
        };

        let outcome = self.run(id, track, intro, &token).await;
        self.finish(id, &outcome);

        match &outcome {
            Outcome::Completed => info!(session = id, track = %track, "Track completed"),
            Outcome::Cancelled => info!(session = id, track = %track, "Track skipped"),
            Outcome::Failed(reason) => {
                warn!(session = id, track = %track, "Track failed: {}", reason)
            }
        }
        Ok(outcome)
    }

    async fn run(
        &self,
        id: u64,
        track: &Track,
        intro: Option<PathBuf>,
        token: &CancellationToken,
    ) -> Outcome {
        // skip arrivé entre l'enregistrement et le lancement
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }

        let request = TranscodeRequest {
            session_id: id,
            track: track.clone(),
            intro,
        };
        let mut job = match self.transcoder.launch(&request) {
            Ok(job) => job,
            Err(e) => {
                error!(session = id, track = %track, "Launch failed: {}", e);
                return Outcome::Failed(e.to_string());
            }
        };

        self.mark_running(id);

        let exit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = job.wait() => Some(res),
        };

        match exit {
            None => {
                if let Err(e) = job.kill().await {
                    warn!(session = id, "Failed to kill transcoder: {}", e);
                }
                Outcome::Cancelled
            }
            Some(Ok(JobExit::Success)) => Outcome::Completed,
            // un kill externe peut faire sortir le job en erreur juste après l'annulation
            Some(_) if token.is_cancelled() => Outcome::Cancelled,
            Some(Ok(JobExit::Failure(reason))) => Outcome::Failed(reason),
            Some(Err(e)) => Outcome::Failed(e.to_string()),
        }
    }

    fn mark_running(&self, id: u64) {
        let mut slot = self.slot();
        if let Some(active) = slot.active.as_mut().filter(|a| a.id == id) {
            active.state = SessionState::Running;
        }
    }

    /// Clears the session if it is still ours and records it as the last one
    fn finish(&self, id: u64, outcome: &Outcome) {
        let mut slot = self.slot();
        let mut snapshot = match slot.active.as_ref() {
            Some(active) if active.id == id => {
                let snapshot = active.snapshot();
                slot.active = None;
                snapshot
            }
            // déjà retiré par cancel() : on garde la trace de la dernière session
            _ => match slot.last.take() {
                Some(last) if last.id == id => last,
                other => {
                    slot.last = other;
                    return;
                }
            },
        };
        snapshot.state = outcome.state();
        slot.last = Some(snapshot);
    }

    /// Cancels the current session. Returns `false` if nothing was recorded.
    ///
    /// `true` means the kill was requested, not that the job has exited:
    /// the matching `start` call returns once it has.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot();
        match slot.active.take() {
            Some(active) => {
                active.token.cancel();
                let mut snapshot = active.snapshot();
                snapshot.state = SessionState::Cancelled;
                info!(session = active.id, track = %active.track, "Skip requested");
                slot.last = Some(snapshot);
                true
            }
            None => false,
        }
    }

    /// Refuses new sessions and cancels the current one
    pub fn shutdown(&self) -> bool {
        self.slot().closed = true;
        self.cancel()
    }

    pub fn is_closed(&self) -> bool {
        self.slot().closed
    }

    pub fn active_session_id(&self) -> Option<u64> {
        self.slot().active.as_ref().map(|a| a.id)
    }

    pub fn status(&self) -> SupervisorStatus {
        let slot = self.slot();
        let current = slot.active.as_ref().map(ActiveSession::snapshot);
        SupervisorStatus {
            state: current
                .as_ref()
                .map(|c| c.state)
                .unwrap_or(SessionState::Idle),
            current,
            last: slot.last.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Weak;
    use std::time::Duration;
    use tokio::sync::watch;

    /// Job that runs until the transcoder releases it or it is killed
    struct FakeJob {
        release: watch::Receiver<bool>,
        exit: JobExit,
        killed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TranscodeJob for FakeJob {
        async fn wait(&mut self) -> std::io::Result<JobExit> {
            if self.release.wait_for(|released| *released).await.is_err() {
                return Err(std::io::Error::other("transcoder dropped"));
            }
            Ok(self.exit.clone())
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            self.killed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeTranscoder {
        release: watch::Sender<bool>,
        killed: Arc<AtomicUsize>,
        launched: Mutex<Vec<TranscodeRequest>>,
        fail_launch: AtomicBool,
        exit_failure: AtomicBool,
        /// checked at launch time: the session must already be recorded
        supervisor: Mutex<Weak<ProcessSupervisor>>,
        violations: AtomicUsize,
        cancel_during_launch: AtomicBool,
    }

    impl FakeTranscoder {
        fn new() -> Self {
            Self {
                release: watch::channel(false).0,
                killed: Arc::default(),
                launched: Mutex::default(),
                fail_launch: AtomicBool::new(false),
                exit_failure: AtomicBool::new(false),
                supervisor: Mutex::new(Weak::new()),
                violations: AtomicUsize::new(0),
                cancel_during_launch: AtomicBool::new(false),
            }
        }

        /// lets every current and future job exit by itself
        fn release(&self) {
            self.release.send_replace(true);
        }
    }

    impl Transcoder for FakeTranscoder {
        fn launch(&self, request: &TranscodeRequest) -> Result<Box<dyn TranscodeJob>, LaunchError> {
            if let Some(sup) = self.supervisor.lock().unwrap().upgrade() {
                let recorded = sup.active_session_id();
                if recorded.is_some_and(|id| id != request.session_id) {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
                if self.cancel_during_launch.load(Ordering::SeqCst) {
                    sup.cancel();
                }
            }
            if self.fail_launch.load(Ordering::SeqCst) {
                return Err(LaunchError::MissingInput(request.track.path.clone()));
            }
            self.launched.lock().unwrap().push(request.clone());
            let exit = if self.exit_failure.load(Ordering::SeqCst) {
                JobExit::Failure("exit status: 1".to_string())
            } else {
                JobExit::Success
            };
            Ok(Box::new(FakeJob {
                release: self.release.subscribe(),
                exit,
                killed: self.killed.clone(),
            }))
        }
    }

    fn setup() -> (Arc<FakeTranscoder>, Arc<ProcessSupervisor>) {
        let transcoder = Arc::new(FakeTranscoder::new());
        let supervisor = Arc::new(ProcessSupervisor::new(transcoder.clone()));
        *transcoder.supervisor.lock().unwrap() = Arc::downgrade(&supervisor);
        (transcoder, supervisor)
    }

    fn track(name: &str) -> Track {
        Track::new(format!("/music/{name}.mp3"), name)
    }

    async fn wait_until_running(supervisor: &ProcessSupervisor) {
        for _ in 0..200 {
            if supervisor.status().state == SessionState::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached Running");
    }

    #[tokio::test]
    async fn natural_end_is_completed() {
        let (transcoder, supervisor) = setup();
        let sup = supervisor.clone();
        let handle = tokio::spawn(async move { sup.start(&track("a"), None).await });

        wait_until_running(&supervisor).await;
        transcoder.release();

        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Completed);
        assert_eq!(supervisor.active_session_id(), None);
        let status = supervisor.status();
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.last.unwrap().state, SessionState::Completed);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed() {
        let (transcoder, supervisor) = setup();
        transcoder.exit_failure.store(true, Ordering::SeqCst);
        let sup = supervisor.clone();
        let handle = tokio::spawn(async move { sup.start(&track("a"), None).await });

        wait_until_running(&supervisor).await;
        transcoder.release();

        assert!(matches!(handle.await.unwrap().unwrap(), Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn cancel_kills_the_running_job() {
        let (transcoder, supervisor) = setup();
        let sup = supervisor.clone();
        let handle = tokio::spawn(async move { sup.start(&track("a"), None).await });

        wait_until_running(&supervisor).await;
        assert!(supervisor.cancel());
        assert_eq!(supervisor.active_session_id(), None);

        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Cancelled);
        assert_eq!(transcoder.killed.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.status().last.unwrap().state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_with_nothing_running_is_a_no_op() {
        let (_transcoder, supervisor) = setup();
        assert!(!supervisor.cancel());
        assert!(!supervisor.cancel());
    }

    #[tokio::test]
    async fn second_start_is_refused_while_busy() {
        let (transcoder, supervisor) = setup();
        let sup = supervisor.clone();
        let handle = tokio::spawn(async move { sup.start(&track("a"), None).await });
        wait_until_running(&supervisor).await;

        let current = supervisor.active_session_id().unwrap();
        assert_eq!(
            supervisor.start(&track("b"), None).await,
            Err(SupervisorError::SessionBusy { current })
        );
        assert_eq!(transcoder.launched.lock().unwrap().len(), 1);

        transcoder.release();
        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Completed);
    }

    #[tokio::test]
    async fn launch_failure_returns_failed_immediately() {
        let (transcoder, supervisor) = setup();
        transcoder.fail_launch.store(true, Ordering::SeqCst);

        let outcome = supervisor.start(&track("a"), None).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(reason) if reason.contains("a.mp3")));
        assert_eq!(supervisor.active_session_id(), None);
    }

    #[tokio::test]
    async fn cancel_then_restart_leaves_no_dangling_session() {
        let (transcoder, supervisor) = setup();
        let sup = supervisor.clone();
        let first = tokio::spawn(async move { sup.start(&track("a"), None).await });
        wait_until_running(&supervisor).await;
        let first_id = supervisor.active_session_id().unwrap();

        assert!(supervisor.cancel());
        let sup = supervisor.clone();
        let second = tokio::spawn(async move { sup.start(&track("b"), Some("/w/intro.wav".into())).await });

        assert_eq!(first.await.unwrap().unwrap(), Outcome::Cancelled);
        wait_until_running(&supervisor).await;
        let second_id = supervisor.active_session_id().unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(supervisor.status().current.unwrap().track, track("b"));

        transcoder.release();
        assert_eq!(second.await.unwrap().unwrap(), Outcome::Completed);
        assert_eq!(supervisor.active_session_id(), None);

        let launched = transcoder.launched.lock().unwrap();
        assert_eq!(launched[1].intro, Some(PathBuf::from("/w/intro.wav")));
    }

    #[tokio::test]
    async fn cancel_during_launch_is_not_lost() {
        let (transcoder, supervisor) = setup();
        transcoder.cancel_during_launch.store(true, Ordering::SeqCst);

        let outcome = supervisor.start(&track("a"), None).await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(transcoder.killed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_sessions() {
        let (transcoder, supervisor) = setup();
        let sup = supervisor.clone();
        let handle = tokio::spawn(async move { sup.start(&track("a"), None).await });
        wait_until_running(&supervisor).await;

        assert!(supervisor.shutdown());
        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Cancelled);
        assert_eq!(
            supervisor.start(&track("b"), None).await,
            Err(SupervisorError::ShuttingDown)
        );
        assert_eq!(transcoder.launched.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_start_and_cancel_keep_one_recorded_session() {
        let (transcoder, supervisor) = setup();
        let mut tasks = Vec::new();

        for i in 0..32 {
            let sup = supervisor.clone();
            tasks.push(tokio::spawn(async move {
                let _ = sup.start(&track(&format!("t{i}")), None).await;
            }));
            let sup = supervisor.clone();
            tasks.push(tokio::spawn(async move {
                sup.cancel();
            }));
        }

        while tasks.iter().any(|t| !t.is_finished()) {
            supervisor.cancel();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(transcoder.violations.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.active_session_id(), None);
    }
}
