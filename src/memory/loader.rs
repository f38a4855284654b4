//! Recursive discovery of indexable configuration files.

use crate::memory::models::{Document, dotted_extension};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Walks a data directory and loads every file with an allowed extension.
pub struct DocumentLoader {
    data_dir: PathBuf,
    extensions: Vec<String>,
}

impl DocumentLoader {
    pub fn new(data_dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            extensions,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether `path` has one of the allowed extensions.
    pub fn is_indexable(&self, path: &Path) -> bool {
        has_allowed_extension(path, &self.extensions)
    }

    /// Load all indexable documents, sorted by relative path.
    ///
    /// A missing or empty directory is not an error: the result is simply
    /// empty and a warning is logged so the caller can stay idle.
    pub fn load(&self) -> Vec<Document> {
        if !self.data_dir.is_dir() {
            tracing::warn!(
                path = %self.data_dir.display(),
                "data directory does not exist, nothing to index"
            );
            return Vec::new();
        }

        let mut documents: Vec<Document> = indexable_files(&self.data_dir, &self.extensions)
            .filter_map(|path| self.process_file(&path))
            .collect();
        documents.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        if documents.is_empty() {
            tracing::warn!(
                path = %self.data_dir.display(),
                extensions = %self.extensions.join(", "),
                "data directory has no indexable files"
            );
        } else {
            tracing::info!(count = documents.len(), "discovered documents");
        }
        documents
    }

    fn process_file(&self, path: &Path) -> Option<Document> {
        let text = match std::fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(path = %path.display(), "file is not UTF-8, decoding lossily");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read file");
                return None;
            }
        };

        let extension = dotted_extension(path)?;
        let relative_path = self.relative_path(path);

        Some(Document {
            id: Document::stable_id(&relative_path),
            path: path.to_path_buf(),
            relative_path,
            extension,
            text,
        })
    }

    fn relative_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.data_dir).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Regular files under `root` with an allowed extension.
///
/// Hidden entries are pruned. Symlinks are neither followed nor indexed, so
/// nothing outside `root` is reached and link cycles cannot repeat files.
fn indexable_files<'a>(
    root: &Path,
    extensions: &'a [String],
) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(move |path| has_allowed_extension(path, extensions))
}

/// Whether the directory tree at `dir` holds at least one indexable file.
pub fn contains_indexable(dir: &Path, extensions: &[String]) -> bool {
    indexable_files(dir, extensions).next().is_some()
}

/// Exact, case-sensitive match of the dotted extension against `allowed`.
pub fn has_allowed_extension(path: &Path, allowed: &[String]) -> bool {
    dotted_extension(path).is_some_and(|ext| allowed.iter().any(|a| *a == ext))
}

/// Dotfiles and dot-directories are never indexed.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn default_extensions() -> Vec<String> {
        [".tf", ".yml", ".yaml", ".sh", ".ini"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn loads_every_supported_extension_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("env/prod")).expect("mkdir");
        fs::write(dir.path().join("main.tf"), "resource aws_s3_bucket logs {}").unwrap();
        fs::write(dir.path().join("ci.yml"), "stages: [build]").unwrap();
        fs::write(dir.path().join("env/prod/values.yaml"), "replicas: 3").unwrap();
        fs::write(dir.path().join("deploy.sh"), "#!/bin/sh\nterraform apply").unwrap();
        fs::write(dir.path().join("env/prod/hosts.ini"), "[web]\n10.0.0.1").unwrap();

        let loader = DocumentLoader::new(dir.path(), default_extensions());
        let documents = loader.load();

        let paths: Vec<&str> = documents.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "ci.yml",
                "deploy.sh",
                "env/prod/hosts.ini",
                "env/prod/values.yaml",
                "main.tf"
            ]
        );
        let values = documents
            .iter()
            .find(|d| d.relative_path == "env/prod/values.yaml")
            .expect("values.yaml loaded");
        assert_eq!(values.extension, ".yaml");
        assert_eq!(values.text, "replicas: 3");
    }

    #[test]
    fn ignores_unsupported_and_hidden_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join(".terraform")).unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();
        fs::write(dir.path().join("notes.txt"), "notes").unwrap();
        fs::write(dir.path().join("MAIN.TF"), "uppercase extension").unwrap();
        fs::write(dir.path().join(".secret.tf"), "hidden").unwrap();
        fs::write(dir.path().join(".terraform/cache.tf"), "hidden dir").unwrap();
        fs::write(dir.path().join("app.tf"), "resource aws_instance web").unwrap();

        let loader = DocumentLoader::new(dir.path(), default_extensions());
        let documents = loader.load();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].relative_path, "app.tf");
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = DocumentLoader::new(dir.path().join("absent"), default_extensions());
        assert!(loader.load().is_empty());
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = DocumentLoader::new(dir.path(), default_extensions());
        assert!(loader.load().is_empty());
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("legacy.ini"), b"[db]\nname=caf\xe9\n").unwrap();

        let loader = DocumentLoader::new(dir.path(), default_extensions());
        let documents = loader.load();

        assert_eq!(documents.len(), 1);
        assert!(documents[0].text.starts_with("[db]\nname=caf"));
    }

    #[test]
    fn ids_are_stable_across_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("app.tf"), "v1").unwrap();
        let loader = DocumentLoader::new(dir.path(), default_extensions());
        let first = loader.load();

        fs::write(dir.path().join("app.tf"), "v2").unwrap();
        let second = loader.load();

        assert_eq!(first[0].id, second[0].id);
        assert_ne!(first[0].text, second[0].text);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("app.tf"), "resource aws_instance web").unwrap();
        fs::write(outside.path().join("foreign.tf"), "outside the data dir").unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("external")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("foreign.tf"),
            dir.path().join("linked.tf"),
        )
        .unwrap();

        let loader = DocumentLoader::new(dir.path(), default_extensions());
        let documents = loader.load();

        let paths: Vec<&str> = documents.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["app.tf"]);
    }

    #[test]
    fn contains_indexable_looks_through_subdirectories() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("modules/vpc")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/README.md"), "# docs").unwrap();

        assert!(!contains_indexable(dir.path(), &default_extensions()));

        fs::write(dir.path().join("modules/vpc/main.tf"), "module vpc").unwrap();
        assert!(contains_indexable(dir.path(), &default_extensions()));
        assert!(!contains_indexable(&dir.path().join("docs"), &default_extensions()));
    }
}
