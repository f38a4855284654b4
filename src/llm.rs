//! Remote language model access.
//!
//! Answers and remote embeddings both come from the Gemini REST API. Every
//! call goes through a [`RetryPolicy`] so a hung or throttled request can
//! never stall the chat loop or a rebuild indefinitely.

pub mod gemini;
pub mod retry;

pub use gemini::{GeminiClient, GeminiModel};
pub use retry::RetryPolicy;

use crate::error::Result;

/// Produces a completion for a fully rendered prompt.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
