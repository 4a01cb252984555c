//! Session title suggestion.
//!
//! `LlmTitleSuggester` asks the inference source for a short, descriptive
//! title based on the first user-assistant exchange.

use std::sync::Arc;

use colloquy_types::llm::{CompletionRequest, LlmError, Message, MessageRole};
use futures_util::future::BoxFuture;

use crate::llm::box_provider::BoxInferenceSource;

/// System prompt for the title generation call.
const TITLE_SYSTEM_PROMPT: &str = r#"Generate a short, descriptive title (3-7 words) for this conversation based on the first exchange. The title should capture the main topic or intent. Return ONLY the title text, nothing else.

Examples:
- "Debugging Rust lifetime errors"
- "Planning a weekend trip to Tokyo"
- "Understanding quantum computing basics""#;

/// Proposes a title for a session from its first exchange.
pub trait TitleSuggester: Send + Sync {
    fn suggest<'a>(
        &'a self,
        first_user_message: &'a str,
        first_assistant_message: &'a str,
        model: &'a str,
    ) -> BoxFuture<'a, Result<String, LlmError>>;
}

/// Title suggester backed by a non-streaming completion.
pub struct LlmTitleSuggester {
    source: Arc<BoxInferenceSource>,
    /// Overrides the session model when set.
    model: Option<String>,
}

impl LlmTitleSuggester {
    pub fn new(source: Arc<BoxInferenceSource>, model: Option<String>) -> Self {
        Self { source, model }
    }
}

impl TitleSuggester for LlmTitleSuggester {
    fn suggest<'a>(
        &'a self,
        first_user_message: &'a str,
        first_assistant_message: &'a str,
        model: &'a str,
    ) -> BoxFuture<'a, Result<String, LlmError>> {
        let model = self.model.as_deref().unwrap_or(model);
        Box::pin(generate_title(
            &self.source,
            first_user_message,
            first_assistant_message,
            model,
        ))
    }
}

/// Generate a session title at low temperature (0.3), trimmed of whitespace
/// and surrounding quotes.
#[tracing::instrument(
    name = "generate_title",
    skip(source, first_user_message, first_assistant_message),
    fields(model = %model)
)]
pub async fn generate_title(
    source: &BoxInferenceSource,
    first_user_message: &str,
    first_assistant_message: &str,
    model: &str,
) -> Result<String, LlmError> {
    let request = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            Message {
                role: MessageRole::User,
                content: first_user_message.to_string(),
            },
            Message {
                role: MessageRole::Assistant,
                content: first_assistant_message.to_string(),
            },
            Message {
                role: MessageRole::User,
                content: "Based on our exchange above, generate a title.".to_string(),
            },
        ],
        system: Some(TITLE_SYSTEM_PROMPT.to_string()),
        max_tokens: 50,
        temperature: Some(0.3),
        stream: false,
    };

    let response = source.complete(&request).await?;
    Ok(clean_title(&response.content))
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedSource;

    #[test]
    fn test_title_trimming() {
        assert_eq!(clean_title("  \"Debugging Rust Lifetimes\"  "), "Debugging Rust Lifetimes");
        assert_eq!(clean_title("'Planning a Trip'"), "Planning a Trip");
        assert_eq!(clean_title("  Understanding Quantum Computing  "), "Understanding Quantum Computing");
    }

    #[test]
    fn test_title_system_prompt_constraints() {
        assert!(TITLE_SYSTEM_PROMPT.contains("3-7 words"));
        assert!(TITLE_SYSTEM_PROMPT.contains("ONLY the title text"));
    }

    #[tokio::test]
    async fn test_suggester_uses_override_model() {
        let scripted = Arc::new(ScriptedSource::new());
        scripted.set_completion(Ok("\"Tokyo Weekend\"".to_string()));
        let source = Arc::new(BoxInferenceSource::new(Arc::clone(&scripted)));
        let suggester = LlmTitleSuggester::new(source, Some("title-model".to_string()));

        let title = suggester.suggest("Plan a trip", "Sure!", "chat-model").await.unwrap();
        assert_eq!(title, "Tokyo Weekend");

        let requests = scripted.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "title-model");
        assert_eq!(requests[0].temperature, Some(0.3));
        assert!(!requests[0].stream);
    }
}
