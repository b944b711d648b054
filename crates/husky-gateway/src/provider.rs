//! Language-model provider trait and implementations.
//!
//! - `OpenAiProvider` talks to any endpoint implementing the OpenAI wire
//!   format (`/chat/completions`, `/embeddings`), including local servers.
//! - `MockProvider` produces deterministic hash-based vectors and canned
//!   completions for testing.
//!
//! Exactly one concrete provider is selected at process start from
//! configuration; everything downstream sees only the trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use husky_core::error::{HuskyError, Result};

/// A single completion call: fixed system instructions plus the composed
/// user prompt. History management lives in the chat crate; a request is
/// one round-trip.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

/// Capability interface over a language-model provider.
///
/// Implementations convert text into fixed-dimensional vectors and generate
/// chat completions, optionally streaming deltas through a channel.
pub trait LanguageModelProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// Generate a completion for the request, returning the full text.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Generate a completion, sending incremental deltas through `deltas`
    /// as they arrive and returning the full text. A dropped receiver must
    /// not fail the call.
    fn complete_stream(
        &self,
        request: &CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`LanguageModelProvider`] for dynamic dispatch.
///
/// Because the trait methods return `impl Future` they are not object-safe.
/// This trait uses boxed futures instead, allowing
/// `Box<dyn DynLanguageModelProvider>` to be stored without generics. A
/// blanket implementation covers every `LanguageModelProvider`.
pub trait DynLanguageModelProvider: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>>;

    fn complete_stream_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: LanguageModelProvider> DynLanguageModelProvider for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }

    fn complete_stream_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.complete_stream(request, deltas))
    }

    fn dimensions(&self) -> usize {
        LanguageModelProvider::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OpenAiProvider - OpenAI-compatible HTTP endpoints
// ---------------------------------------------------------------------------

/// Adapter for any HTTP endpoint implementing the OpenAI wire format.
///
/// Constructed once at startup; `reqwest::Client` is an `Arc` internally so
/// clones are cheap. The wire types are private to this module.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_base_url: String,
    completion_model: String,
    embedding_model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiProvider {
    pub fn new(
        api_base_url: String,
        completion_model: String,
        embedding_model: String,
        timeout_secs: u64,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                HuskyError::Config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            completion_model,
            embedding_model,
            api_key,
            dimensions,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_base_url, path);
        let req = self.authorize(self.client.post(&url).json(body));
        let response = req.send().await.map_err(transport_error)?;
        check_status(response).await
    }
}

/// Map transport-level failures: timeouts and connection errors are
/// retryable, everything else at this layer is too (the request never
/// reached a provider decision).
fn transport_error(e: reqwest::Error) -> HuskyError {
    if e.is_timeout() {
        HuskyError::TransientProvider(format!("request timed out: {e}"))
    } else {
        HuskyError::TransientProvider(format!("transport failure: {e}"))
    }
}

/// Consume the response, mapping HTTP status to the error taxonomy:
/// 429 carries the Retry-After hint, other 4xx are permanent validation
/// failures, 5xx are transient.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let message = format!("HTTP {status}: {body}");
    error!(%status, "provider returned HTTP error");

    if status.as_u16() == 429 {
        Err(HuskyError::RateLimited {
            message,
            retry_after,
        })
    } else if status.is_client_error() {
        Err(HuskyError::Validation(message))
    } else {
        Err(HuskyError::TransientProvider(message))
    }
}

impl LanguageModelProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(HuskyError::Validation("cannot embed empty text".into()));
        }

        let payload = EmbeddingWireRequest {
            model: self.embedding_model.clone(),
            input: text.to_string(),
        };
        let response = self.post_json("/embeddings", &payload).await?;
        let parsed: EmbeddingWireResponse = response.json().await.map_err(|e| {
            HuskyError::TransientProvider(format!("failed to parse embedding response: {e}"))
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                HuskyError::TransientProvider("embedding response contained no data".into())
            })
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = chat_payload(self, request, false);
        debug!(
            model = %payload.model,
            prompt_len = request.prompt.len(),
            "sending completion request"
        );
        let response = self.post_json("/chat/completions", &payload).await?;
        let parsed: ChatWireResponse = response.json().await.map_err(|e| {
            HuskyError::TransientProvider(format!("failed to parse completion response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.and_then(|m| m.content))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HuskyError::TransientProvider("empty or missing completion content".into())
            })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<String> {
        let payload = chat_payload(self, request, true);
        let response = self.post_json("/chat/completions", &payload).await?;

        let mut answer = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(transport_error)?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // SSE events are newline-delimited "data: {json}" lines.
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<ChatWireResponse>(data) {
                    if let Some(delta) = event
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.and_then(|d| d.content))
                    {
                        answer.push_str(&delta);
                        // Receiver may have gone away; keep accumulating.
                        let _ = deltas.send(delta).await;
                    }
                }
            }
        }

        if answer.trim().is_empty() {
            return Err(HuskyError::TransientProvider(
                "streamed completion produced no content".into(),
            ));
        }
        Ok(answer.trim().to_string())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn chat_payload(
    provider: &OpenAiProvider,
    request: &CompletionRequest,
    stream: bool,
) -> ChatWireRequest {
    ChatWireRequest {
        model: provider.completion_model.clone(),
        messages: vec![
            WireMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            },
            WireMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            },
        ],
        temperature: request.temperature,
        stream,
    }
}

// -- Private wire types --

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatWireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatWireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireContent>,
    #[serde(default)]
    delta: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingWireRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireResponse {
    data: Vec<EmbeddingWireDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingWireDatum {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// MockProvider - deterministic vectors and canned completions for testing
// ---------------------------------------------------------------------------

/// Mock provider returning deterministic 384-dimensional unit vectors and a
/// fixed completion reply.
///
/// Identical inputs always produce identical vectors, which makes retrieval
/// and dedup behavior testable without a real model.
#[derive(Debug, Clone)]
pub struct MockProvider {
    reply: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            reply: "Here is what the directory shows. [1]".to_string(),
        }
    }

    /// Use a specific canned reply (tests that assert on answer content).
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(384);
        for i in 0..384 {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize so cosine scores behave like the real backend.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }
        result
    }
}

impl LanguageModelProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(HuskyError::Validation("cannot embed empty text".into()));
        }
        Ok(Self::hash_to_vector(text))
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok(self.reply.clone())
    }

    async fn complete_stream(
        &self,
        _request: &CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<String> {
        for word in self.reply.split_inclusive(' ') {
            let _ = deltas.send(word.to_string()).await;
        }
        Ok(self.reply.clone())
    }

    fn dimensions(&self) -> usize {
        384
    }
}
