use serde::Serialize;
use std::path::{Path, PathBuf};
use utoipa::ToSchema;

/// One playable audio file and the label it is announced with.
///
/// Immutable once resolved: the library builds it once per path and the
/// rotator, supervisor and handoff only ever clone it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub struct Track {
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub display_label: String,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, display_label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            display_label: display_label.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name as shown when nothing better is known
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_label)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
