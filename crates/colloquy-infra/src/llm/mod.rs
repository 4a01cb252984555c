//! Inference source implementations.
//!
//! Contains the OpenAI-compatible HTTP source and a factory
//! ([`create_source`]) that builds it from [`ProviderSettings`].

pub mod openai_compat;

use secrecy::SecretString;

use colloquy_core::llm::box_provider::BoxInferenceSource;
use colloquy_types::config::ProviderSettings;
use colloquy_types::llm::LlmError;

use self::openai_compat::OpenAiCompatSource;

/// Create a [`BoxInferenceSource`] from provider settings.
///
/// A missing key is only logged: local endpoints accept anonymous requests,
/// and hosted ones reject the first call with `AuthenticationFailed`.
pub fn create_source(
    settings: &ProviderSettings,
    api_key: Option<SecretString>,
) -> Result<BoxInferenceSource, LlmError> {
    if api_key.is_none() {
        tracing::warn!(
            provider = %settings.name,
            env = %settings.api_key_env,
            "no API key set; requests will be sent unauthenticated"
        );
    }
    let source = OpenAiCompatSource::new(settings, api_key)?;
    tracing::debug!(provider = %settings.name, base_url = %settings.base_url, "inference source created");
    Ok(BoxInferenceSource::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_source_uses_provider_name() {
        let settings = ProviderSettings {
            name: "ollama".to_string(),
            ..ProviderSettings::default()
        };
        let source = create_source(&settings, Some(SecretString::from("k"))).unwrap();
        assert_eq!(source.name(), "ollama");
    }
}
