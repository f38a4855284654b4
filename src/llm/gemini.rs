//! Gemini REST client for text generation and batch embeddings.

use crate::config::{Credentials, LlmConfig};
use crate::error::{LlmError, Result};
use crate::llm::{LanguageModel, RetryPolicy};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Task hint sent with embedding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Thin authenticated wrapper over the Gemini `v1beta` endpoints.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, credentials: &Credentials, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            retry,
        }
    }

    /// Embed `texts` in a single batch request. Returns one vector per text,
    /// in input order.
    pub async fn batch_embed(
        &self,
        model: &str,
        texts: &[String],
        task_type: TaskType,
        dimensions: Option<usize>,
    ) -> std::result::Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let qualified = format!("models/{model}");
        let body = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &qualified,
                    content: Content::user_text(text),
                    task_type,
                    output_dimensionality: dimensions,
                })
                .collect(),
        };
        let url = format!("{}/v1beta/models/{model}:batchEmbedContents", self.base_url);

        let response: BatchEmbedResponse = self
            .retry
            .run("embedding", || self.post_json(&url, &body))
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::EmbeddingFailed(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    /// Single-turn text generation.
    pub async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        temperature: Option<f32>,
    ) -> std::result::Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: vec![Content::user_text(prompt)],
            generation_config: temperature.map(|temperature| GenerationConfig {
                temperature: Some(temperature),
            }),
        };
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);

        let response: GenerateContentResponse = self
            .retry
            .run("generation", || self.post_json(&url, &body))
            .await?;

        response.text().ok_or(LlmError::EmptyResponse)
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> std::result::Result<R, LlmError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| LlmError::Transport(format!("malformed response from model API: {e}")))
    }
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let head: String = body.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}

/// Gemini chat model used to answer questions.
pub struct GeminiModel {
    client: Arc<GeminiClient>,
    model: String,
    temperature: Option<f32>,
}

impl GeminiModel {
    pub fn new(client: Arc<GeminiClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let started = std::time::Instant::now();
        let text = self
            .client
            .generate_content(&self.model, prompt, self.temperature)
            .await?;
        tracing::debug!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated answer"
        );
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn user_text(text: &'a str) -> Self {
        Self {
            role: Some("user"),
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embed_request_uses_gemini_field_names() {
        let qualified = "models/gemini-embedding-001".to_string();
        let request = BatchEmbedRequest {
            requests: vec![EmbedContentRequest {
                model: &qualified,
                content: Content::user_text("replicas: 3"),
                task_type: TaskType::RetrievalDocument,
                output_dimensionality: Some(768),
            }],
        };

        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "requests": [{
                    "model": "models/gemini-embedding-001",
                    "content": {"role": "user", "parts": [{"text": "replicas: 3"}]},
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": 768
                }]
            })
        );
    }

    #[test]
    fn generate_request_omits_unset_temperature() {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text("hi")],
            generation_config: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("generationConfig").is_none());
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "The instance "}, {"text": "is t3.micro."}]}},
                {"content": {"role": "model", "parts": [{"text": "ignored"}]}}
            ]
        }))
        .expect("deserialize");

        assert_eq!(response.text().as_deref(), Some("The instance is t3.micro."));
    }

    #[test]
    fn blocked_response_has_no_text() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]}))
                .expect("deserialize");
        assert!(response.text().is_none());

        let empty: GenerateContentResponse = serde_json::from_value(json!({})).expect("deserialize");
        assert!(empty.text().is_none());
    }

    #[test]
    fn debug_output_hides_api_key() {
        let client = GeminiClient::new(
            "https://example.invalid/",
            &Credentials {
                api_key: "super-secret".to_string(),
            },
            RetryPolicy::default(),
        );
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("https://example.invalid"));
    }
}
