//! ffmpeg HLS transcoder and segment directory hygiene.
//!
//! Each session runs one `ffmpeg` process that reads the track in real time
//! and appends AAC segments to a rolling HLS playlist (`stream.m3u8`). With
//! `temp_file` in `-hls_flags`, ffmpeg writes the index and every segment to
//! a `.tmp` file and renames it into place, so readers never see a partial
//! file. `append_list` keeps one continuous playlist across sessions.

use crate::config::TranscoderConfig;
use crate::error::LaunchError;
use crate::supervisor::{JobExit, TranscodeJob, TranscodeRequest, Transcoder};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// HLS index file name inside the segments directory
pub const INDEX_FILE: &str = "stream.m3u8";

const SEGMENT_PATTERN: &str = "segment_%d.ts";

pub struct FfmpegTranscoder {
    config: TranscoderConfig,
    segments_dir: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig, segments_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            segments_dir: segments_dir.into(),
        }
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.segments_dir.join(INDEX_FILE)
    }

    /// `true` if the configured ffmpeg binary answers `-version`
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    fn intro_filter(&self) -> String {
        let delay = self.config.intro_delay_ms;
        format!(
            "[0:a]volume=1[music];\
             [1:a]aformat=sample_rates=44100:channel_layouts=stereo,volume={gain},adelay={delay}|{delay}[intro];\
             [music][intro]amix=inputs=2:duration=first:dropout_transition=3[aout]",
            gain = self.config.intro_gain,
        )
    }

    /// Command line for one session (program excluded)
    pub fn build_args(&self, track: &Path, intro: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(OsString::from)
            .collect();
        if self.config.realtime {
            args.push("-re".into());
        }
        args.push("-y".into());
        args.push("-i".into());
        args.push(track.into());

        match intro {
            Some(intro) => {
                args.push("-i".into());
                args.push(intro.into());
                args.push("-filter_complex".into());
                args.push(self.intro_filter().into());
                args.push("-map".into());
                args.push("[aout]".into());
            }
            None => {
                args.push("-vn".into());
            }
        }

        let segment_seconds = self.config.segment_seconds.max(1).to_string();
        let list_size = self.config.playlist_size.to_string();
        for arg in [
            "-c:a",
            self.config.audio_codec.as_str(),
            "-b:a",
            self.config.bitrate.as_str(),
            "-f",
            "hls",
            "-hls_time",
            segment_seconds.as_str(),
            "-hls_list_size",
            list_size.as_str(),
            "-hls_flags",
            "delete_segments+append_list+omit_endlist+temp_file",
            "-hls_segment_filename",
        ] {
            args.push(arg.into());
        }
        args.push(self.segments_dir.join(SEGMENT_PATTERN).into());
        args.push(self.index_path().into());
        args
    }
}

impl Transcoder for FfmpegTranscoder {
    fn launch(&self, request: &TranscodeRequest) -> Result<Box<dyn TranscodeJob>, LaunchError> {
        let track = request.track.path();
        if !track.is_file() {
            return Err(LaunchError::MissingInput(track.to_path_buf()));
        }

        let intro = request.intro.as_deref().filter(|p| {
            let present = p.is_file();
            if !present {
                warn!(session = request.session_id, intro = %p.display(), "Claimed intro vanished, playing without it");
            }
            present
        });

        let args = self.build_args(track, intro);
        debug!(session = request.session_id, ?args, "Launching ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source,
            })?;

        let session = request.session_id;
        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(session, "ffmpeg: {}", line);
                    last = Some(line);
                }
                last
            })
        });

        info!(
            session,
            track = %request.track,
            intro = intro.is_some(),
            "ffmpeg started"
        );
        Ok(Box::new(FfmpegJob { child, stderr }))
    }
}

/// Running ffmpeg process
pub struct FfmpegJob {
    child: Child,
    stderr: Option<JoinHandle<Option<String>>>,
}

#[async_trait]
impl TranscodeJob for FfmpegJob {
    async fn wait(&mut self) -> std::io::Result<JobExit> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(JobExit::Success);
        }

        // stderr se ferme avec le processus
        let last_line = match self.stderr.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };
        Ok(JobExit::Failure(match last_line {
            Some(line) => format!("ffmpeg {status}: {line}"),
            None => format!("ffmpeg {status}"),
        }))
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

/// Empties the segments directory (creating it if needed)
pub async fn reset_segments_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "Cannot remove stale stream file: {}", e),
        }
    }
    info!(dir = %dir.display(), removed, "Segments directory reset");
    Ok(())
}

/// Segment names referenced by an HLS index
fn referenced_segments(index: &str) -> HashSet<String> {
    index
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| Path::new(l).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

/// Removes `.ts` segments the index no longer references and stray `.tmp`
/// files left by an interrupted ffmpeg. Returns the number of files removed.
pub async fn prune_stale_segments(dir: &Path) -> std::io::Result<usize> {
    let referenced = match tokio::fs::read_to_string(dir.join(INDEX_FILE)).await {
        Ok(index) => referenced_segments(&index),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = name.ends_with(".tmp") || (name.ends_with(".ts") && !referenced.contains(&name));
        if stale {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => debug!(file = %name, "Cannot prune segment: {}", e),
            }
        }
    }

    if removed > 0 {
        debug!(dir = %dir.display(), removed, "Pruned stale segments");
    }
    Ok(removed)
}
