//! Display labels for audio files.
//!
//! Labels are built from the file tags, read in-process with `lofty` (or
//! with `ffprobe` for containers lofty does not know), falling back to an
//! `Artist - Title` file stem, and finally to the bare file name. Resolution
//! never fails.

use crate::track::file_name_of;
use async_trait::async_trait;
use lofty::{config::ParseOptions, prelude::*, probe::Probe};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Reduces a file path to the label announced and displayed for it
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, path: &Path) -> String;
}

/// Resolver that only looks at the file name
#[derive(Debug, Default, Clone, Copy)]
pub struct FileNameResolver;

#[async_trait]
impl MetadataResolver for FileNameResolver {
    async fn resolve(&self, path: &Path) -> String {
        compose_label(&HashMap::new(), path)
    }
}

/// Resolver reading the primary tag (or the first one) with `lofty`
#[derive(Debug, Clone, Default)]
pub struct LoftyResolver {
    fallback: Option<FfprobeResolver>,
}

impl LoftyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks `ffprobe` when lofty cannot parse the file or finds no tag
    pub fn with_ffprobe_fallback(mut self, fallback: FfprobeResolver) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// Artist, title, album and year of the file, if it carries a tag
pub fn read_tags(path: &Path) -> Option<HashMap<String, String>> {
    let tagged_file = Probe::open(path)
        .and_then(|probe| probe.options(ParseOptions::new()).read())
        .map_err(|e| debug!(path = %path.display(), "lofty cannot read tags: {}", e))
        .ok()?;

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())?;

    let mut tags = HashMap::new();
    if let Some(artist) = tag.artist() {
        tags.insert("artist".to_string(), artist.into_owned());
    }
    if let Some(title) = tag.title() {
        tags.insert("title".to_string(), title.into_owned());
    }
    if let Some(album) = tag.album() {
        tags.insert("album".to_string(), album.into_owned());
    }
    if let Some(year) = tag.year() {
        tags.insert("year".to_string(), year.to_string());
    }
    Some(tags)
}

#[async_trait]
impl MetadataResolver for LoftyResolver {
    async fn resolve(&self, path: &Path) -> String {
        let owned = path.to_path_buf();
        let tags = tokio::task::spawn_blocking(move || read_tags(&owned))
            .await
            .unwrap_or_else(|e| {
                debug!(path = %path.display(), "Tag reader task failed: {}", e);
                None
            });

        let tags = match (tags, &self.fallback) {
            (Some(tags), _) if !tags.is_empty() => tags,
            (_, Some(ffprobe)) => ffprobe.probe_tags(path).await.unwrap_or_default(),
            (tags, None) => tags.unwrap_or_default(),
        };
        compose_label(&tags, path)
    }
}

/// Resolver backed by `ffprobe -show_format`
#[derive(Debug, Clone)]
pub struct FfprobeResolver {
    program: PathBuf,
}

impl FfprobeResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn probe_tags(&self, path: &Path) -> Option<HashMap<String, String>> {
        let output = Command::new(&self.program)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| debug!(path = %path.display(), "ffprobe unavailable: {}", e))
            .ok()?;

        if !output.status.success() {
            debug!(path = %path.display(), status = %output.status, "ffprobe failed");
            return None;
        }

        parse_probe_output(&output.stdout)
    }
}

impl Default for FfprobeResolver {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl MetadataResolver for FfprobeResolver {
    async fn resolve(&self, path: &Path) -> String {
        let tags = self.probe_tags(path).await.unwrap_or_default();
        compose_label(&tags, path)
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Deserialize, Default)]
struct ProbeFormat {
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn parse_probe_output(stdout: &[u8]) -> Option<HashMap<String, String>> {
    serde_json::from_slice::<ProbeOutput>(stdout)
        .ok()
        .map(|probe| probe.format.tags)
}

/// Returns the first non-empty tag among `keys`, compared case-insensitively
fn tag<'a>(tags: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|wanted| {
        tags.iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(wanted) && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    })
}

/// Builds the display label from tags, filling gaps from the file stem.
///
/// `Artist - Title [Album, Year]`, `Artist - Title [Album]`,
/// `Artist - Title [Year]`, `Title [Year]`, `Title`, or the file name.
pub fn compose_label(tags: &HashMap<String, String>, path: &Path) -> String {
    let mut artist = tag(tags, &["artist", "albumartist"]).map(str::to_string);
    let mut title = tag(tags, &["title"]).map(str::to_string);
    let album = tag(tags, &["album"]);
    let year = tag(tags, &["date", "year", "originaldate"]);

    if artist.is_none() || title.is_none() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match stem.split_once(" - ") {
            Some((a, t)) => {
                if artist.is_none() && !a.trim().is_empty() {
                    artist = Some(a.trim().to_string());
                }
                if title.is_none() && !t.trim().is_empty() {
                    title = Some(t.trim().to_string());
                }
            }
            None if title.is_none() && !stem.is_empty() => title = Some(stem),
            None => {}
        }
    }

    match (artist, title) {
        (Some(artist), Some(title)) => {
            let mut label = format!("{artist} - {title}");
            match (album, year) {
                (Some(album), Some(year)) => label.push_str(&format!(" [{album}, {year}]")),
                (Some(album), None) => label.push_str(&format!(" [{album}]")),
                (None, Some(year)) => label.push_str(&format!(" [{year}]")),
                (None, None) => {}
            }
            label
        }
        (None, Some(title)) => match year {
            Some(year) => format!("{title} [{year}]"),
            None => title,
        },
        _ => file_name_of(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_tags() {
        let t = tags(&[
            ("ARTIST", "Nina Simone"),
            ("Title", "Sinnerman"),
            ("album", "Pastel Blues"),
            ("DATE", "1965"),
        ]);
        assert_eq!(
            compose_label(&t, Path::new("/m/x.flac")),
            "Nina Simone - Sinnerman [Pastel Blues, 1965]"
        );
    }

    #[test]
    fn album_without_year_and_year_without_album() {
        let t = tags(&[("artist", "A"), ("title", "T"), ("album", "LP")]);
        assert_eq!(compose_label(&t, Path::new("x.mp3")), "A - T [LP]");

        let t = tags(&[("albumartist", "A"), ("title", "T"), ("originaldate", "1999")]);
        assert_eq!(compose_label(&t, Path::new("x.mp3")), "A - T [1999]");
    }

    #[test]
    fn artist_and_title_from_file_stem() {
        let t = tags(&[("year", "2001")]);
        assert_eq!(
            compose_label(&t, Path::new("/music/Daft Punk - One More Time.mp3")),
            "Daft Punk - One More Time [2001]"
        );
    }

    #[test]
    fn stem_without_separator_becomes_title() {
        let t = tags(&[("date", "1977")]);
        assert_eq!(compose_label(&t, Path::new("/music/heroes.ogg")), "heroes [1977]");
        assert_eq!(compose_label(&HashMap::new(), Path::new("heroes.ogg")), "heroes");
    }

    #[test]
    fn tag_title_wins_over_stem() {
        let t = tags(&[("title", "Real Title")]);
        assert_eq!(
            compose_label(&t, Path::new("Someone - Other.mp3")),
            "Someone - Real Title"
        );
    }

    #[test]
    fn hidden_file_falls_back_to_file_name() {
        // ".mp3" has stem ".mp3" and no extension, so it still yields a label
        assert_eq!(compose_label(&HashMap::new(), Path::new("/m/.mp3")), ".mp3");
    }

    #[test]
    fn probe_output_parsing() {
        let json = br#"{"format":{"filename":"x","tags":{"artist":"A","title":"T"}}}"#;
        let parsed = parse_probe_output(json).unwrap();
        assert_eq!(parsed["artist"], "A");

        let no_tags = br#"{"format":{"filename":"x"}}"#;
        assert!(parse_probe_output(no_tags).unwrap().is_empty());

        assert!(parse_probe_output(b"not json").is_none());
    }

    /// 0.05 s of 8 kHz mono silence
    fn silent_wav() -> Vec<u8> {
        let data = vec![0u8; 800];
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&16000u32.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data.len() as u32).to_le_bytes());
        wav.extend_from_slice(&data);
        wav
    }

    #[tokio::test]
    async fn lofty_reads_embedded_tags() {
        use lofty::config::WriteOptions;
        use lofty::tag::{Tag, TagType};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("untitled.wav");
        std::fs::write(&path, silent_wav()).unwrap();

        let mut tag = Tag::new(TagType::Id3v2);
        tag.set_artist("Nina Simone".to_string());
        tag.set_title("Sinnerman".to_string());
        tag.set_album("Pastel Blues".to_string());
        tag.save_to_path(&path, WriteOptions::default()).unwrap();

        let label = LoftyResolver::new().resolve(&path).await;
        assert_eq!(label, "Nina Simone - Sinnerman [Pastel Blues]");
    }

    #[tokio::test]
    async fn unreadable_file_falls_back_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Artist - Song.mp3");
        std::fs::write(&path, b"not audio at all").unwrap();

        assert_eq!(LoftyResolver::new().resolve(&path).await, "Artist - Song");

        let resolver = LoftyResolver::new()
            .with_ffprobe_fallback(FfprobeResolver::new("/nonexistent/ffprobe-binary"));
        assert_eq!(resolver.resolve(&path).await, "Artist - Song");
        assert_eq!(
            resolver.resolve(&dir.path().join("missing.flac")).await,
            "missing"
        );
    }

    #[tokio::test]
    async fn missing_ffprobe_falls_back_to_file_stem() {
        let resolver = FfprobeResolver::new("/nonexistent/ffprobe-binary");
        let label = resolver
            .resolve(Path::new("/music/Artist - Song.mp3"))
            .await;
        assert_eq!(label, "Artist - Song");
    }
}
