//! Configuration for the memory system.
//!
//! Values are layered: built-in defaults, then a TOML file, then
//! `INFRA_MEMORY__*` environment variables (nested keys joined by `__`), then
//! command-line overrides applied by the binary. The Gemini credential is read
//! separately from `GEMINI_API_KEY` and is never part of the file.

use crate::error::ConfigError;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that must hold the model API key.
pub const CREDENTIAL_ENV: &str = "GEMINI_API_KEY";

const ENV_PREFIX: &str = "INFRA_MEMORY";
const LOCAL_CONFIG_FILE: &str = "infra-memory.toml";

/// Default Gemini REST endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Question-answering template: context block, then the query.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Context information is below.
---------------------
{{ context }}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {{ question }}
Answer: ";

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub data: DataConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub chunking: ChunkingConfig,
    pub query: QueryConfig,
    pub watcher: WatcherConfig,
    pub logging: LoggingConfig,
}

/// Source directory and the file types it contributes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub dir: PathBuf,
    /// Extensions including the leading dot, matched exactly.
    pub extensions: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./devops_files"),
            extensions: [".tf", ".yml", ".yaml", ".sh", ".ini"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Where the vector collection lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub collection: String,
    /// Superseded table versions older than this are deleted after a build.
    /// Must outlive the slowest in-flight query against the previous index.
    pub prune_after_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./memory_db"),
            collection: "devops_project_memory".to_string(),
            prune_after_secs: 600,
        }
    }
}

impl StoreConfig {
    pub fn prune_after(&self) -> Duration {
        Duration::from_secs(self.prune_after_secs)
    }
}

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Gemini,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    /// Output dimensionality requested from the remote model.
    pub dimensions: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Model download directory for the local backend.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Gemini,
            model: "gemini-embedding-001".to_string(),
            dimensions: 768,
            batch_size: 32,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            temperature: None,
        }
    }
}

/// Bounds applied to every remote model call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Largest fragment, in characters.
    pub max_chars: usize,
    /// Characters carried over from the end of one fragment into the next.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 4_000,
            overlap_chars: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k: usize,
    pub prompt_template: String,
    pub exit_keyword: String,
    /// Number of retrieved fragments echoed after each answer.
    pub preview_fragments: usize,
    /// Characters shown per echoed fragment.
    pub preview_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            exit_keyword: "exit".to_string(),
            preview_fragments: 3,
            preview_chars: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Window in which bursts of change events collapse into one rebuild.
    pub debounce_ms: u64,
    pub queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            queue_capacity: 64,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

impl MemoryConfig {
    /// Load configuration from `explicit_path` if given, otherwise from the
    /// first default location that exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        match explicit_path {
            Some(path) => {
                builder = builder.add_source(::config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    tracing::debug!(path = %path.display(), "using configuration file");
                    builder = builder.add_source(::config::File::from(path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("data.extensions")
                    .try_parsing(true),
            )
            .build()?;

        let config: MemoryConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "data.extensions must list at least one extension".to_string(),
            ));
        }
        if let Some(bad) = self.data.extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(ConfigError::Invalid(format!(
                "extension '{bad}' must start with '.'"
            )));
        }
        if self.store.collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.collection must not be empty".to_string(),
            ));
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::Invalid("query.top_k must be at least 1".to_string()));
        }
        if self.embedding.batch_size == 0 || self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size and embedding.dimensions must be positive".to_string(),
            ));
        }
        if self.chunking.max_chars == 0 || self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(ConfigError::Invalid(
                "chunking.overlap_chars must be smaller than chunking.max_chars".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("infra-memory").join("config.toml"))
        .filter(|path| path.is_file())
}

/// Secrets pulled from the process environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read the API key. A missing or blank key is a fatal startup error.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CREDENTIAL_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self { api_key: key }),
            _ => Err(ConfigError::MissingCredential(CREDENTIAL_ENV)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_devops_layout() {
        let config = MemoryConfig::default();
        assert_eq!(config.data.dir, PathBuf::from("./devops_files"));
        assert_eq!(
            config.data.extensions,
            vec![".tf", ".yml", ".yaml", ".sh", ".ini"]
        );
        assert_eq!(config.store.collection, "devops_project_memory");
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.toml");
        std::fs::write(
            &path,
            r#"
[data]
dir = "/srv/infra"
extensions = [".tf"]

[query]
top_k = 5
"#,
        )
        .expect("write config");

        let config = MemoryConfig::load(Some(&path)).expect("load");
        assert_eq!(config.data.dir, PathBuf::from("/srv/infra"));
        assert_eq!(config.data.extensions, vec![".tf"]);
        assert_eq!(config.query.top_k, 5);
        // untouched sections keep their defaults
        assert_eq!(config.store.collection, "devops_project_memory");
        assert_eq!(config.watcher.debounce_ms, 500);
    }

    #[test]
    fn rejects_extension_without_dot() {
        let mut config = MemoryConfig::default();
        config.data.extensions = vec!["tf".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_overlap_larger_than_fragment() {
        let mut config = MemoryConfig::default();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = MemoryConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
