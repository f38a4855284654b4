//! Embedding providers: remote Gemini embeddings or local fastembed.

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{LlmError, Result};
use crate::llm::GeminiClient;
use crate::llm::gemini::TaskType;

use std::path::Path;
use std::sync::Arc;

/// Whether text is being embedded for storage or for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    Document,
    Query,
}

/// Maps text to fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// each of length [`EmbeddingProvider::dimensions`].
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the underlying model, logged with every build.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()], task).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::EmbeddingFailed("no embedding returned".to_string()).into())
    }
}

/// Construct the provider selected by `config`.
pub fn build_embedder(
    config: &EmbeddingConfig,
    client: Arc<GeminiClient>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::Gemini => Ok(Arc::new(GeminiEmbedder::new(client, config))),
        EmbeddingBackend::Local => {
            let cache_dir = config
                .cache_dir
                .clone()
                .or_else(|| dirs::cache_dir().map(|dir| dir.join("infra-memory").join("models")))
                .unwrap_or_else(|| Path::new(".fastembed_cache").to_path_buf());
            Ok(Arc::new(LocalEmbedder::new(&cache_dir)?))
        }
    }
}

/// Remote embeddings via `batchEmbedContents`.
pub struct GeminiEmbedder {
    client: Arc<GeminiClient>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl GeminiEmbedder {
    pub fn new(client: Arc<GeminiClient>, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let task_type = match task {
            EmbedTask::Document => TaskType::RetrievalDocument,
            EmbedTask::Query => TaskType::RetrievalQuery,
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .client
                .batch_embed(&self.model, batch, task_type, Some(self.dimensions))
                .await?;
            for vector in embedded {
                if vector.len() != self.dimensions {
                    return Err(LlmError::EmbeddingFailed(format!(
                        "model returned {} dimensions, expected {}",
                        vector.len(),
                        self.dimensions
                    ))
                    .into());
                }
                vectors.push(normalize(vector));
            }
        }
        Ok(vectors)
    }
}

/// Truncated-dimension Gemini vectors are not unit length; normalise so
/// cosine ranking is stable across output sizes.
fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Dimensionality of fastembed's default model (all-MiniLM-L6-v2).
pub const LOCAL_EMBEDDING_DIM: usize = 384;

/// Offline embeddings via fastembed.
///
/// Inference is CPU-bound and blocking, so the model is shared behind an Arc
/// and every call runs on `spawn_blocking`.
pub struct LocalEmbedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl LocalEmbedder {
    /// Load the model, storing downloaded files in `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        // Keep ONNX Runtime from sizing its pool to every core.
        if std::env::var("OMP_NUM_THREADS").is_err() {
            // SAFETY: called during startup before any ONNX threads exist.
            unsafe { std::env::set_var("OMP_NUM_THREADS", "2") };
        }

        let options = fastembed::InitOptions::default()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(true);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| LlmError::EmbeddingFailed(e.to_string()))?;

        tracing::info!(cache_dir = %cache_dir.display(), "loaded local embedding model");
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_id(&self) -> &str {
        "fastembed/all-MiniLM-L6-v2"
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIM
    }

    async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| crate::Error::from(LlmError::EmbeddingFailed(e.to_string())))
        })
        .await
        .map_err(|e| crate::Error::Other(anyhow::anyhow!("embedding task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vectors() {
        let vector = normalize(vec![3.0, 4.0]);
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    struct Fixed;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Fixed {
        fn model_id(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[test]
    fn embed_one_returns_single_vector() {
        let vector = tokio_test::block_on(Fixed.embed_one("abc", EmbedTask::Query)).expect("embed");
        assert_eq!(vector, vec![3.0, 1.0]);
    }
}
