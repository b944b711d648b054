//! The single client for embedding and completion calls.
//!
//! Every provider round-trip in the system goes through `ModelGateway`. It
//! applies per-call timeout handling (the provider client owns the timeout),
//! bounded retries with exponential backoff and jitter, rate-limit wait
//! hints, and a shared circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use husky_core::config::GatewayConfig;
use husky_core::error::{HuskyError, Result};

use crate::breaker::CircuitBreaker;
use crate::provider::{CompletionRequest, DynLanguageModelProvider};

/// Provider access with retry, backoff, and circuit breaking.
///
/// Cheap to clone; the provider and breaker are shared so the breaker sees
/// failures from every call site.
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn DynLanguageModelProvider>,
    breaker: Arc<CircuitBreaker>,
    config: GatewayConfig,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn DynLanguageModelProvider>, config: GatewayConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_failure_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        ));
        Self {
            provider,
            breaker,
            config,
        }
    }

    /// Dimensionality of the underlying provider's embedding vectors.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Whether the breaker is currently rejecting calls.
    pub fn circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Embed a single text with the full retry policy applied.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run_with_policy("embed", || self.provider.embed_boxed(text))
            .await
    }

    /// Run a completion with the full retry policy applied.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.run_with_policy("complete", || self.provider.complete_boxed(request))
            .await
    }

    /// Streaming completion.
    ///
    /// Each attempt streams into its own channel, and deltas reach
    /// `deltas` only once the attempt producing them has succeeded. A
    /// retried attempt's partial output is never delivered, so the
    /// consumer sees exactly one answer.
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<String> {
        self.run_with_policy("complete_stream", || {
            let provider = Arc::clone(&self.provider);
            let caller = deltas.clone();
            Box::pin(async move {
                let (tx, mut rx) = mpsc::channel(32);
                let collector = tokio::spawn(async move {
                    let mut collected = Vec::new();
                    while let Some(delta) = rx.recv().await {
                        collected.push(delta);
                    }
                    collected
                });

                let result = provider.complete_stream_boxed(request, tx).await;
                let collected = collector.await.unwrap_or_default();
                let answer = result?;

                for delta in collected {
                    if caller.send(delta).await.is_err() {
                        // Receiver gone; the full answer still returns.
                        break;
                    }
                }
                Ok(answer)
            })
        })
        .await
    }

    /// Retry loop shared by all call kinds.
    ///
    /// Permanent errors return immediately and do not count against the
    /// breaker. Retryable errors back off exponentially with jitter, except
    /// that a rate-limit wait hint from the provider overrides the computed
    /// delay.
    async fn run_with_policy<'a, T, F>(&'a self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>>
            + Send
            + 'a,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.breaker.check()?;

            match call().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    self.breaker.record_failure();
                    if attempt >= max_attempts {
                        warn!(op, attempt, error = %e, "giving up after final attempt");
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt, &e);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "retryable failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32, error: &HuskyError) -> Duration {
        let cap = Duration::from_millis(self.config.max_delay_ms);
        if let HuskyError::RateLimited {
            retry_after: Some(wait),
            ..
        } = error
        {
            return (*wait).min(cap);
        }

        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let base = exp.min(self.config.max_delay_ms);
        // +/- 25% jitter keeps concurrent retries from synchronizing.
        let factor = rand::rng().random_range(0.75..=1.25);
        Duration::from_millis((base as f64 * factor) as u64)
    }
}
