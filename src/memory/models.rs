//! Documents, records and query results flowing through the memory pipeline.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A source file discovered by the loader.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable identifier derived from the path relative to the data directory.
    pub id: String,
    /// Absolute (or as-configured) path to the file.
    pub path: PathBuf,
    /// Path relative to the data directory, `/`-separated.
    pub relative_path: String,
    /// Extension including the leading dot, e.g. `.tf`.
    pub extension: String,
    /// Full file contents.
    pub text: String,
}

impl Document {
    pub fn stable_id(relative_path: &str) -> String {
        let digest = Sha256::digest(relative_path.as_bytes());
        format!("doc_{}", hex::encode(&digest[..8]))
    }
}

/// A piece of a document small enough to embed on its own.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: String,
    pub document_id: String,
    pub path: String,
    pub extension: String,
    pub index: usize,
    pub text: String,
}

impl Fragment {
    pub fn record_id(document_id: &str, index: usize) -> String {
        format!("{document_id}#{index}")
    }
}

/// Metadata persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMetadata {
    pub path: String,
    pub extension: String,
    pub fragment_index: usize,
}

/// One row of the vector collection.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl Record {
    pub fn from_fragment(fragment: Fragment, vector: Vec<f32>) -> Self {
        Self {
            id: fragment.id,
            vector,
            text: fragment.text,
            metadata: RecordMetadata {
                path: fragment.path,
                extension: fragment.extension,
                fragment_index: fragment.index,
            },
        }
    }
}

/// A record returned by nearest-neighbour search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedFragment {
    pub id: String,
    pub text: String,
    pub path: String,
    pub extension: String,
    pub fragment_index: usize,
    /// Cosine distance to the query vector (lower is closer).
    pub distance: f32,
}

impl RetrievedFragment {
    /// Similarity in `0.0..=1.0` derived from the cosine distance.
    pub fn score(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }

    /// The first `max_chars` characters of the text, for display.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Generated answer plus the context that produced it, in retrieval order.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedFragment>,
}

impl Answer {
    pub fn source_texts(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Statistics from a completed rebuild.
#[derive(Debug, Clone)]
pub struct BuildStats {
    pub documents: usize,
    pub records: usize,
    pub removed_stale: usize,
    pub generation: u64,
    pub elapsed: Duration,
}

/// What a call to `IndexBuilder::build` achieved.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// A new snapshot was installed.
    Built(BuildStats),
    /// The data directory had nothing to index; the previous snapshot (if
    /// any) is still installed.
    NoData { data_dir: PathBuf },
}

impl BuildOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self, BuildOutcome::Built(_))
    }
}

/// Kind of filesystem change that can invalidate the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// A relevant filesystem change observed by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Extension of `path` with a leading dot, if it has one.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_depends_only_on_relative_path() {
        let first = Document::stable_id("modules/vpc/main.tf");
        let second = Document::stable_id("modules/vpc/main.tf");
        let other = Document::stable_id("modules/vpc/outputs.tf");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.starts_with("doc_"));
        assert_eq!(first.len(), "doc_".len() + 16);
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let fragment = RetrievedFragment {
            id: "doc_1#0".to_string(),
            text: "ресурс aws_instance".to_string(),
            path: "app.tf".to_string(),
            extension: ".tf".to_string(),
            fragment_index: 0,
            distance: 0.25,
        };
        assert_eq!(fragment.preview(6), "ресурс...");
        assert_eq!(fragment.preview(100), "ресурс aws_instance");
        assert!((fragment.score() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn dotted_extension_handles_missing_extension() {
        assert_eq!(dotted_extension(Path::new("a/b.yaml")), Some(".yaml".to_string()));
        assert_eq!(dotted_extension(Path::new("Makefile")), None);
    }
}
