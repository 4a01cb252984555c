//! Deterministic inference source driven by pre-recorded scripts.
//!
//! Each call to `stream` consumes the next queued [`Script`]. When the queue
//! is empty the source answers with `fallback` as a single fragment. Every
//! request is recorded so callers can assert on what was sent.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError, StreamEvent};
use tokio::sync::mpsc;

use super::provider::{EventStream, InferenceSource};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Delta(String),
    Delay(Duration),
    /// Emit a stream error and stop.
    Fail(String),
    /// Emit the explicit end-of-stream event.
    Done,
    /// Never produce anything again; only cancellation ends the stream.
    Hang,
}

/// A queued answer for one `stream` call.
#[derive(Debug)]
pub enum Script {
    Steps(Vec<ScriptStep>),
    /// Events pushed by the test through the paired sender.
    Channel(mpsc::UnboundedReceiver<Result<StreamEvent, LlmError>>),
}

impl Script {
    /// Fragments followed by `Done`.
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<ScriptStep> = fragments
            .into_iter()
            .map(|f| ScriptStep::Delta(f.into()))
            .collect();
        steps.push(ScriptStep::Done);
        Script::Steps(steps)
    }

    /// A script fed by hand; returns the sender that drives it.
    pub fn channel() -> (mpsc::UnboundedSender<Result<StreamEvent, LlmError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Script::Channel(rx))
    }
}

#[derive(Debug)]
pub struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
    fallback: String,
    completion: Mutex<Result<String, String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback: "ok".to_string(),
            completion: Mutex::new(Ok("Scripted Title".to_string())),
        }
    }

    /// Queue the answer for the next `stream` call.
    pub fn push(&self, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }

    /// Set what `complete` answers from now on. `Err` yields a provider error.
    pub fn set_completion(&self, answer: Result<String, String>) {
        if let Ok(mut completion) = self.completion.lock() {
            *completion = answer;
        }
    }

    /// Every request seen so far, streaming and non-streaming alike.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn record(&self, request: &CompletionRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }

    fn next_script(&self) -> Script {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Script::reply([self.fallback.clone()]))
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.record(request);
        let answer = self
            .completion
            .lock()
            .map(|c| c.clone())
            .map_err(|e| LlmError::Provider {
                message: e.to_string(),
            })?;
        match answer {
            Ok(content) => Ok(CompletionResponse {
                id: uuid::Uuid::now_v7().to_string(),
                content,
                model: request.model.clone(),
            }),
            Err(message) => Err(LlmError::Provider { message }),
        }
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        self.record(&request);
        match self.next_script() {
            Script::Steps(steps) => Box::pin(async_stream::stream! {
                yield Ok(StreamEvent::Connected);
                for step in steps {
                    match step {
                        ScriptStep::Delta(text) => yield Ok(StreamEvent::TextDelta { text }),
                        ScriptStep::Delay(d) => tokio::time::sleep(d).await,
                        ScriptStep::Fail(message) => {
                            yield Err(LlmError::Stream(message));
                            return;
                        }
                        ScriptStep::Done => yield Ok(StreamEvent::Done),
                        ScriptStep::Hang => futures_util::future::pending::<()>().await,
                    }
                }
            }),
            Script::Channel(mut rx) => Box::pin(async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            messages: vec![],
            system: None,
            max_tokens: 16,
            temperature: None,
            stream: true,
        }
    }

    #[tokio::test]
    async fn test_reply_script_yields_fragments_then_done() {
        let source = ScriptedSource::new();
        source.push(Script::reply(["He", "llo"]));

        let events: Vec<_> = source
            .stream(request())
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Connected,
                StreamEvent::TextDelta { text: "He".into() },
                StreamEvent::TextDelta { text: "llo".into() },
                StreamEvent::Done,
            ]
        );
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_step_ends_with_error() {
        let source = ScriptedSource::new();
        source.push(Script::Steps(vec![
            ScriptStep::Delta("Partial".into()),
            ScriptStep::Fail("reset".into()),
            ScriptStep::Delta("never".into()),
        ]));

        let events: Vec<_> = source.stream(request()).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], Err(LlmError::Stream(_))));
    }

    #[tokio::test]
    async fn test_empty_queue_uses_fallback() {
        let source = ScriptedSource::new();
        let texts: Vec<String> = source
            .stream(request())
            .filter_map(|e| async move {
                match e {
                    Ok(StreamEvent::TextDelta { text }) => Some(text),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(texts, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_completion_error() {
        let source = ScriptedSource::new();
        source.set_completion(Err("down".into()));
        assert!(source.complete(&request()).await.is_err());
    }
}
