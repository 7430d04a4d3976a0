//! Music library scan.
//!
//! The playback loop asks a [`TrackSource`] for the full track set at every
//! pass boundary (and on every idle poll), which is how files dropped into
//! the music directory join the rotation.

use crate::metadata::MetadataResolver;
use crate::track::Track;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Provides the current set of playable tracks
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn tracks(&self) -> Vec<Track>;
}

/// Fixed track list, mostly useful for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticTracks(pub Vec<Track>);

#[async_trait]
impl TrackSource for StaticTracks {
    async fn tracks(&self) -> Vec<Track> {
        self.0.clone()
    }
}

/// Recursive directory scan filtered by extension
pub struct MusicLibrary {
    root: PathBuf,
    extensions: Vec<String>,
    resolver: Arc<dyn MetadataResolver>,
    labels: Mutex<HashMap<PathBuf, String>>,
}

impl MusicLibrary {
    pub fn new(
        root: impl Into<PathBuf>,
        extensions: &[String],
        resolver: Arc<dyn MetadataResolver>,
    ) -> Self {
        Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            resolver,
            labels: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    /// Sorted, de-duplicated list of matching files under the root
    pub async fn scan(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), "Cannot read music directory: {}", e);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), "Error while listing directory: {}", e);
                        break;
                    }
                };
                let path = entry.path();
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => pending.push(path),
                    Ok(_) if self.accepts(&path) => found.push(path),
                    Ok(_) => {}
                    Err(e) => debug!(path = %path.display(), "Skipping entry: {}", e),
                }
            }
        }

        found.sort();
        found.dedup();
        found
    }

    async fn label_for(&self, path: &Path) -> String {
        let cached = self
            .labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        if let Some(label) = cached {
            return label;
        }

        let label = self.resolver.resolve(path).await;
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), label.clone());
        label
    }
}

#[async_trait]
impl TrackSource for MusicLibrary {
    async fn tracks(&self) -> Vec<Track> {
        let paths = self.scan().await;
        let mut tracks = Vec::with_capacity(paths.len());
        for path in paths {
            let label = self.label_for(&path).await;
            tracks.push(Track::new(path, label));
        }

        // oublier les fichiers disparus
        {
            let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
            labels.retain(|p, _| tracks.iter().any(|t| &t.path == p));
        }

        debug!(root = %self.root.display(), count = tracks.len(), "Music library scanned");
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FileNameResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver(AtomicUsize);

    #[async_trait]
    impl MetadataResolver for CountingResolver {
        async fn resolve(&self, path: &Path) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            FileNameResolver.resolve(path).await
        }
    }

    fn exts() -> Vec<String> {
        vec!["mp3".into(), ".FLAC".into()]
    }

    #[tokio::test]
    async fn scan_is_recursive_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::write(dir.path().join("b/nested/Z - last.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("a.MP3"), b"").unwrap();
        std::fs::write(dir.path().join("b/c.flac"), b"").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"").unwrap();

        let library = MusicLibrary::new(dir.path(), &exts(), Arc::new(FileNameResolver));
        let tracks = library.tracks().await;

        let names: Vec<String> = tracks.iter().map(|t| t.file_name()).collect();
        assert_eq!(names, vec!["a.MP3", "c.flac", "Z - last.mp3"]);
        assert_eq!(tracks[2].display_label, "Z - last");
    }

    #[tokio::test]
    async fn labels_are_resolved_once_per_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("two.mp3"), b"").unwrap();

        let resolver = Arc::new(CountingResolver(AtomicUsize::new(0)));
        let library = MusicLibrary::new(dir.path(), &exts(), resolver.clone());

        library.tracks().await;
        library.tracks().await;
        assert_eq!(resolver.0.load(Ordering::SeqCst), 2);

        std::fs::write(dir.path().join("three.mp3"), b"").unwrap();
        assert_eq!(library.tracks().await.len(), 3);
        assert_eq!(resolver.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_root_yields_no_tracks() {
        let library = MusicLibrary::new(
            "/nonexistent/pmoradio/music",
            &exts(),
            Arc::new(FileNameResolver),
        );
        assert!(library.tracks().await.is_empty());
    }
}
