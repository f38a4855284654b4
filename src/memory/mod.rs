//! Project memory over infrastructure configuration files.
//!
//! Indexes a directory of Terraform, YAML, shell and ini files into a LanceDB
//! vector collection, keeps it fresh as files change, and answers questions
//! by retrieving the closest fragments and handing them to a language model.

pub mod chunker;
pub mod embedding;
pub mod index;
pub mod loader;
pub mod models;
pub mod prompt;
pub mod query;
pub mod store;
pub mod watcher;

use crate::config::{Credentials, MemoryConfig};
use crate::error::Result;
use crate::llm::{GeminiClient, GeminiModel, LanguageModel, RetryPolicy};
use std::sync::Arc;

pub use chunker::Chunker;
pub use embedding::{EmbedTask, EmbeddingProvider, GeminiEmbedder, LocalEmbedder, build_embedder};
pub use index::{IndexBuilder, IndexHandle, IndexSnapshot};
pub use loader::DocumentLoader;
pub use models::{Answer, BuildOutcome, BuildStats, ChangeEvent, ChangeKind, Document, RetrievedFragment};
pub use prompt::PromptTemplate;
pub use query::QueryEngine;
pub use store::{Collection, CollectionSnapshot, VectorStore};
pub use watcher::{FileWatcher, WatcherHandle, WatcherState};

/// The wired-up memory: one builder and one query engine sharing a handle.
pub struct ProjectMemory {
    pub builder: Arc<IndexBuilder>,
    pub engine: QueryEngine,
}

impl ProjectMemory {
    /// Connect the store and construct every component from configuration,
    /// using Gemini for generation.
    pub async fn open(config: &MemoryConfig, credentials: &Credentials) -> Result<Self> {
        let client = Arc::new(GeminiClient::new(
            config.llm.base_url.clone(),
            credentials,
            RetryPolicy::from(&config.retry),
        ));
        let embedder = build_embedder(&config.embedding, client.clone())?;
        let model: Arc<dyn LanguageModel> = Arc::new(GeminiModel::new(client, &config.llm));
        Self::with_providers(config, embedder, model).await
    }

    /// Like [`ProjectMemory::open`] but with caller-supplied providers.
    pub async fn with_providers(
        config: &MemoryConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let store = VectorStore::connect(&config.store.path).await?;
        let handle = IndexHandle::new();
        let engine = QueryEngine::new(handle.clone(), embedder.clone(), model, &config.query)?;
        let builder = Arc::new(IndexBuilder::new(config, store, embedder, handle));
        Ok(Self { builder, engine })
    }

    pub async fn build(&self) -> Result<BuildOutcome> {
        self.builder.build().await
    }

    pub fn watch(&self, config: &MemoryConfig) -> Result<WatcherHandle> {
        FileWatcher::start(self.builder.clone(), &config.watcher)
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.engine.answer(question).await
    }

    pub fn is_ready(&self) -> bool {
        self.builder.handle().is_ready()
    }
}
