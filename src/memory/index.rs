//! Full-rebuild indexing pipeline and the process-wide index handle.

use crate::config::MemoryConfig;
use crate::error::{LlmError, Result};
use crate::memory::chunker::Chunker;
use crate::memory::embedding::{EmbedTask, EmbeddingProvider};
use crate::memory::loader::DocumentLoader;
use crate::memory::models::{BuildOutcome, BuildStats, Fragment, Record};
use crate::memory::store::{CollectionSnapshot, VectorStore};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};

/// One immutable, queryable build of the memory.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub collection: CollectionSnapshot,
    pub generation: u64,
    pub documents: usize,
    pub embedding_model: String,
    pub built_at: DateTime<Utc>,
}

/// Shared pointer to the snapshot queries should use.
///
/// Starts empty; each successful build swaps in a complete new snapshot.
/// Readers take an `Arc` and keep using it even if a swap happens meanwhile.
#[derive(Clone)]
pub struct IndexHandle {
    current: Arc<ArcSwapOption<IndexSnapshot>>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self {
            current: Arc::new(ArcSwapOption::empty()),
        }
    }
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The installed snapshot, or `None` before the first successful build.
    pub fn load(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }

    fn install(&self, snapshot: IndexSnapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }
}

/// Loads, embeds and stores the data directory, then publishes the result.
pub struct IndexBuilder {
    loader: Arc<DocumentLoader>,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: VectorStore,
    collection_name: String,
    prune_after: Duration,
    batch_size: usize,
    handle: IndexHandle,
    build_lock: Mutex<()>,
    generation: AtomicU64,
    generation_tx: watch::Sender<u64>,
}

impl IndexBuilder {
    pub fn new(
        config: &MemoryConfig,
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
        handle: IndexHandle,
    ) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            loader: Arc::new(DocumentLoader::new(
                config.data.dir.clone(),
                config.data.extensions.clone(),
            )),
            chunker: Chunker::new(&config.chunking),
            embedder,
            store,
            collection_name: config.store.collection.clone(),
            prune_after: config.store.prune_after(),
            batch_size: config.embedding.batch_size.max(1),
            handle,
            build_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            generation_tx,
        }
    }

    pub fn handle(&self) -> IndexHandle {
        self.handle.clone()
    }

    pub fn loader(&self) -> &DocumentLoader {
        &self.loader
    }

    /// Receives the generation number after every successful build.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Rebuild the whole collection from the data directory.
    ///
    /// Builds never overlap. On any error the installed snapshot is left as
    /// it was. With nothing to index (no matching files, or only blank ones)
    /// the result is [`BuildOutcome::NoData`] and the handle is likewise
    /// untouched.
    pub async fn build(&self) -> Result<BuildOutcome> {
        let _guard = self.build_lock.lock().await;
        let started = Instant::now();

        let loader = self.loader.clone();
        let documents = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| crate::Error::Other(anyhow::anyhow!("document loading task failed: {}", e)))?;

        let fragments: Vec<Fragment> = documents
            .iter()
            .flat_map(|document| self.chunker.split(document))
            .collect();

        // Blank files contribute no fragments; an index of nothing is not ready.
        if fragments.is_empty() {
            return Ok(BuildOutcome::NoData {
                data_dir: self.loader.data_dir().to_path_buf(),
            });
        }

        let collection = self
            .store
            .get_or_create_collection(&self.collection_name, self.embedder.dimensions())
            .await?;

        let records = self.embed_fragments(fragments).await?;
        let current_ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        collection.upsert_all(&records).await?;
        let removed_stale = collection.retain_only(&current_ids).await?;
        if let Err(error) = collection.optimize(self.prune_after).await {
            tracing::warn!(%error, "failed to compact collection, continuing");
        }
        let snapshot = collection.snapshot().await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let stats = BuildStats {
            documents: documents.len(),
            records: snapshot.len(),
            removed_stale,
            generation,
            elapsed: started.elapsed(),
        };

        self.handle.install(IndexSnapshot {
            collection: snapshot,
            generation,
            documents: documents.len(),
            embedding_model: self.embedder.model_id().to_string(),
            built_at: Utc::now(),
        });
        self.generation_tx.send_replace(generation);

        tracing::info!(
            generation,
            documents = stats.documents,
            records = stats.records,
            removed_stale,
            model = self.embedder.model_id(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "memory index rebuilt"
        );

        Ok(BuildOutcome::Built(stats))
    }

    /// Embed every fragment before anything is written.
    async fn embed_fragments(&self, fragments: Vec<Fragment>) -> Result<Vec<Record>> {
        let texts: Vec<String> = fragments.iter().map(|f| f.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed(batch, EmbedTask::Document).await?;
            if embedded.len() != batch.len() {
                return Err(LlmError::EmbeddingFailed(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                ))
                .into());
            }
            vectors.extend(embedded);
            tracing::trace!(embedded = vectors.len(), total = texts.len(), "embedding progress");
        }

        Ok(fragments
            .into_iter()
            .zip(vectors)
            .map(|(fragment, vector)| Record::from_fragment(fragment, vector))
            .collect())
    }
}
