//! Retrieval-augmented question answering over the installed index.

use crate::config::QueryConfig;
use crate::error::{DbError, Error, Result};
use crate::llm::LanguageModel;
use crate::memory::embedding::{EmbedTask, EmbeddingProvider};
use crate::memory::index::{IndexHandle, IndexSnapshot};
use crate::memory::models::{Answer, RetrievedFragment};
use crate::memory::prompt::PromptTemplate;

use std::sync::Arc;

/// Separator placed between retrieved fragments in the prompt context.
const CONTEXT_SEPARATOR: &str = "\n\n";

pub struct QueryEngine {
    handle: IndexHandle,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        handle: IndexHandle,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        config: &QueryConfig,
    ) -> Result<Self> {
        Ok(Self {
            handle,
            embedder,
            model,
            template: PromptTemplate::new(config.prompt_template.clone())?,
            top_k: config.top_k.max(1),
        })
    }

    /// Answer `question` from the current index.
    ///
    /// Fails with [`Error::MemoryNotReady`] before the first successful
    /// build; no embedding or model call is made in that case.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let (snapshot, question) = self.prepare(question)?;
        let sources = self.retrieve_from(&snapshot, question).await?;

        let context = sources
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let prompt = self.template.render(question, &context)?;

        tracing::debug!(
            generation = snapshot.generation,
            sources = sources.len(),
            prompt_chars = prompt.len(),
            "answering question"
        );
        let text = self.model.generate(&prompt).await?;

        Ok(Answer { text, sources })
    }

    /// The `top_k` fragments nearest to `question`, closest first.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedFragment>> {
        let (snapshot, question) = self.prepare(question)?;
        self.retrieve_from(&snapshot, question).await
    }

    fn prepare<'q>(&self, question: &'q str) -> Result<(Arc<IndexSnapshot>, &'q str)> {
        let snapshot = self.handle.load().ok_or(Error::MemoryNotReady)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::EmptyQuestion);
        }
        Ok((snapshot, question))
    }

    async fn retrieve_from(
        &self,
        snapshot: &IndexSnapshot,
        question: &str,
    ) -> Result<Vec<RetrievedFragment>> {
        if snapshot.collection.dimensions() != self.embedder.dimensions() {
            return Err(DbError::DimensionMismatch {
                expected: snapshot.collection.dimensions(),
                actual: self.embedder.dimensions(),
            }
            .into());
        }

        let vector = self.embedder.embed_one(question, EmbedTask::Query).await?;
        snapshot.collection.query(&vector, self.top_k).await
    }
}
