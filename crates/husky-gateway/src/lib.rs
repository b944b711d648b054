//! Embedding/Completion gateway for the Husky assistant.
//!
//! The only component allowed to talk to the language-model provider.
//! Wraps a `LanguageModelProvider` with retry, backoff, rate-limit wait
//! hints, and a circuit breaker.

pub mod breaker;
pub mod gateway;
pub mod provider;

pub use breaker::CircuitBreaker;
pub use gateway::ModelGateway;
pub use provider::{
    CompletionRequest, DynLanguageModelProvider, LanguageModelProvider, MockProvider,
    OpenAiProvider,
};
