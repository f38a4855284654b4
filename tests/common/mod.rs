//! Offline providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use infra_memory::llm::LanguageModel;
use infra_memory::memory::{EmbedTask, EmbeddingProvider};
use infra_memory::{MemoryConfig, ProjectMemory, Result};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DIM: usize = 64;

/// Deterministic bag-of-tokens embedder: each token is hashed into one of
/// `DIM - 1` buckets; the last component is a constant so no vector is zero.
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIM];
        for token in text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % (DIM as u64 - 1)) as usize;
            vector[bucket] += 1.0;
        }
        vector[DIM - 1] = 0.5;
        vector
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        "test/hash"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed(&self, texts: &[String], _task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }
}

/// [`HashEmbedder`] that takes `delay` per document batch, so a rebuild
/// stays in flight long enough to observe.
pub struct SlowEmbedder {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn model_id(&self) -> &str {
        "test/slow-hash"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        if task == EmbedTask::Document {
            tokio::time::sleep(self.delay).await;
        }
        HashEmbedder.embed(texts, task).await
    }
}

/// Answers with the prompt it was given, so tests can see the context.
pub struct EchoModel;

#[async_trait::async_trait]
impl LanguageModel for EchoModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

pub fn config(data_dir: &Path, store_dir: &Path) -> MemoryConfig {
    let mut config = MemoryConfig::default();
    config.data.dir = data_dir.to_path_buf();
    config.store.path = store_dir.to_path_buf();
    config.store.collection = "integration_memory".to_string();
    config.watcher.debounce_ms = 100;
    config
}

pub async fn open_memory(config: &MemoryConfig) -> ProjectMemory {
    ProjectMemory::with_providers(config, Arc::new(HashEmbedder), Arc::new(EchoModel))
        .await
        .expect("open memory")
}

pub fn write(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, contents).expect("write fixture");
}
