//! OpenAiCompatSource -- [`InferenceSource`] for OpenAI-compatible endpoints.
//!
//! Talks to any server exposing `/chat/completions` (OpenAI, Ollama,
//! vLLM, LM Studio, OpenRouter, ...). Streaming uses server-sent events and
//! ends at the `[DONE]` sentinel.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building the `Authorization` header.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use colloquy_core::llm::provider::{EventStream, InferenceSource};
use colloquy_types::config::ProviderSettings;
use colloquy_types::llm::{CompletionRequest, CompletionResponse, LlmError, StreamEvent};

/// Sentinel data payload that terminates an OpenAI SSE stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Inference source backed by an OpenAI-compatible HTTP API.
///
/// Does not derive `Debug`; the key never appears in logs.
pub struct OpenAiCompatSource {
    client: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatSource {
    /// Build a source from provider settings.
    ///
    /// `api_key` is optional because local servers (Ollama, LM Studio)
    /// accept unauthenticated requests.
    pub fn new(settings: &ProviderSettings, api_key: Option<SecretString>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            name: settings.name.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn post(&self, body: &ChatCompletionBody) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.url()).json(body);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

impl InferenceSource for OpenAiCompatSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip_all, fields(source = %self.name, model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatCompletionBody::from_request(request, false);
        let response = self.post(&body).send().await.map_err(request_error)?;
        let response = check_status(response).await?;

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            LlmError::Deserialization(format!("failed to parse response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            id: parsed.id.unwrap_or_default(),
            content,
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
        })
    }

    fn stream(&self, request: CompletionRequest) -> EventStream {
        let body = ChatCompletionBody::from_request(&request, true);
        Box::pin(sse_events(self.post(&body).send(), self.name.clone()))
    }
}

/// Drive a pending streaming request and translate its SSE payloads.
fn sse_events<F>(
    send: F,
    source: String,
) -> impl futures_util::Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static
where
    F: Future<Output = Result<reqwest::Response, reqwest::Error>> + Send + 'static,
{
    async_stream::try_stream! {
        let response = send.await.map_err(request_error)?;
        let response = check_status(response).await?;
        tracing::debug!(source = %source, "inference stream connected");
        yield StreamEvent::Connected;

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            if event.data.trim() == DONE_SENTINEL {
                yield StreamEvent::Done;
                break;
            }
            let chunk: ChatCompletionChunk = serde_json::from_str(&event.data)
                .map_err(|e| LlmError::Deserialization(format!("bad stream chunk: {e}")))?;
            for text in chunk.text_fragments() {
                yield StreamEvent::TextDelta { text };
            }
        }
    }
}

fn request_error(e: reqwest::Error) -> LlmError {
    LlmError::Provider {
        message: format!("HTTP request failed: {e}"),
    }
}

/// Map a non-success HTTP status into an [`LlmError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let error_body = response.text().await.unwrap_or_default();

    Err(match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms },
        400 | 404 | 422 => LlmError::InvalidRequest(error_body),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {error_body}"),
        },
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl ChatCompletionBody {
    fn from_request(request: &CompletionRequest, stream: bool) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(WireMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: match m.role {
                colloquy_types::llm::MessageRole::System => "system",
                colloquy_types::llm::MessageRole::User => "user",
                colloquy_types::llm::MessageRole::Assistant => "assistant",
            },
            content: m.content.clone(),
        }));

        Self {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionChunk {
    /// Non-empty text fragments carried by this chunk.
    fn text_fragments(self) -> impl Iterator<Item = String> {
        self.choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::llm::{Message, MessageRole};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                Message {
                    role: MessageRole::User,
                    content: "Hello".to_string(),
                },
                Message {
                    role: MessageRole::Assistant,
                    content: "Hi!".to_string(),
                },
            ],
            system: Some("Be brief.".to_string()),
            max_tokens: 256,
            temperature: Some(0.5),
            stream: true,
        }
    }

    #[test]
    fn test_body_puts_system_prompt_first() {
        let body = ChatCompletionBody::from_request(&request(), true);
        let json = serde_json::to_value(&body).unwrap();

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be brief.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 256);
    }

    #[test]
    fn test_body_omits_missing_temperature_and_system() {
        let mut req = request();
        req.system = None;
        req.temperature = None;
        let json = serde_json::to_value(ChatCompletionBody::from_request(&req, false)).unwrap();

        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_chunk_fragments_skip_empty_and_role_only_deltas() {
        let raw = r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.text_fragments().count(), 0);

        let raw = r#"{"choices":[{"index":0,"delta":{"content":"Hel"}},{"index":1,"delta":{"content":""}}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(chunk.text_fragments().collect::<Vec<_>>(), vec!["Hel"]);
    }

    #[test]
    fn test_completion_response_parses_first_choice() {
        let raw = r#"{"id":"r1","model":"m","choices":[{"message":{"role":"assistant","content":"Title"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Title"));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let settings = ProviderSettings {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ProviderSettings::default()
        };
        let source = OpenAiCompatSource::new(&settings, None).unwrap();
        assert_eq!(source.url(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(source.name(), "openai");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_error() {
        let settings = ProviderSettings {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 2,
            ..ProviderSettings::default()
        };
        let source = OpenAiCompatSource::new(&settings, None).unwrap();
        let mut stream = source.stream(request());
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(LlmError::Provider { .. })));
    }
}
