//! BoxInferenceSource -- object-safe dynamic dispatch wrapper for InferenceSource.
//!
//! 1. Define an object-safe `InferenceSourceDyn` trait with boxed futures
//! 2. Blanket-impl `InferenceSourceDyn` for all `T: InferenceSource`
//! 3. `BoxInferenceSource` wraps `Box<dyn InferenceSourceDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError};

use super::provider::{EventStream, InferenceSource};

/// Object-safe version of [`InferenceSource`] with boxed futures.
pub trait InferenceSourceDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>>;

    fn stream_boxed(&self, request: CompletionRequest) -> EventStream;
}

impl<T: InferenceSource> InferenceSourceDyn for T {
    fn name(&self) -> &str {
        InferenceSource::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.complete(request))
    }

    fn stream_boxed(&self, request: CompletionRequest) -> EventStream {
        self.stream(request)
    }
}

/// Type-erased inference source for runtime selection.
///
/// Since `InferenceSource` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxInferenceSource` provides equivalent methods that delegate
/// to the inner `InferenceSourceDyn` trait object.
pub struct BoxInferenceSource {
    inner: Box<dyn InferenceSourceDyn + Send + Sync>,
}

impl BoxInferenceSource {
    /// Wrap a concrete `InferenceSource` in a type-erased box.
    pub fn new<T: InferenceSource + 'static>(source: T) -> Self {
        Self {
            inner: Box::new(source),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Send a completion request and receive the full response.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        self.inner.complete_boxed(request).await
    }

    /// Send a streaming completion request. Returns a stream of events.
    pub fn stream(&self, request: CompletionRequest) -> EventStream {
        self.inner.stream_boxed(request)
    }
}

impl std::fmt::Debug for BoxInferenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxInferenceSource")
            .field("name", &self.name())
            .finish()
    }
}
