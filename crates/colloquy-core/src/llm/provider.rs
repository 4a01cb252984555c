//! InferenceSource trait definition.
//!
//! The abstraction every token producer implements. Uses RPITIT for
//! `complete`, and `Pin<Box<dyn Stream>>` for `stream` (streams need to be
//! object-safe for the `BoxInferenceSource` wrapper).

use std::pin::Pin;

use futures_util::Stream;

use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError, StreamEvent};

/// Boxed stream of inference events, as handed to the stream ingestor.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for inference backends (OpenAI-compatible endpoints, test doubles).
///
/// A source produces text fragments in generation order and ends either
/// with `StreamEvent::Done`, by closing the stream, or with an error.
///
/// Implementations live in colloquy-infra (e.g., `OpenAiCompatSource`).
pub trait InferenceSource: Send + Sync {
    /// Human-readable source name (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;

    /// Send a streaming completion request. Returns a stream of events.
    fn stream(&self, request: CompletionRequest) -> EventStream;
}

impl<T: InferenceSource> InferenceSource for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send {
        (**self).complete(request)
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        (**self).stream(request)
    }
}
