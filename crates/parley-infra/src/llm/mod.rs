//! Completion provider implementations.
//!
//! Contains the OpenAI-compatible implementation of the [`LlmProvider`]
//! trait defined in `parley-core`, a provider factory ([`create_provider`])
//! that builds the configured provider from [`ProviderSettings`], and a
//! connection test ([`test_provider_connection`]).
//!
//! [`LlmProvider`]: parley_core::llm::provider::LlmProvider

pub mod openai_compat;

use secrecy::SecretString;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_types::config::ProviderSettings;
use parley_types::llm::{CompletionRequest, LlmError, Message, MessageRole};

use self::openai_compat::OpenAiCompatibleProvider;

/// Create a [`BoxLlmProvider`] from the `[provider]` settings.
///
/// Well-known names ("openai", "gemini", "mistral") get their default base
/// URL unless `base_url` overrides it. Any other name requires `base_url`.
///
/// # Errors
///
/// - [`LlmError::AuthenticationFailed`] when no API key was resolved.
/// - [`LlmError::InvalidRequest`] for an unknown provider name without `base_url`.
pub fn create_provider(
    settings: &ProviderSettings,
    api_key: Option<SecretString>,
) -> Result<BoxLlmProvider, LlmError> {
    let key = api_key.ok_or(LlmError::AuthenticationFailed)?;

    let provider = match settings.base_url.as_deref() {
        Some(base_url) => OpenAiCompatibleProvider::new(openai_compat::config::custom_defaults(
            &settings.name,
            base_url,
            key,
            &settings.model,
        )),
        None => match settings.name.as_str() {
            "openai" => OpenAiCompatibleProvider::openai(key, &settings.model),
            "gemini" => OpenAiCompatibleProvider::gemini(key, &settings.model),
            "mistral" => OpenAiCompatibleProvider::mistral(key, &settings.model),
            other => {
                return Err(LlmError::InvalidRequest(format!(
                    "provider '{other}' needs a base_url"
                )));
            }
        },
    };

    tracing::debug!(provider = %settings.name, model = %settings.model, "Completion provider created");
    Ok(BoxLlmProvider::new(provider))
}

/// Test provider connectivity by sending a minimal completion request.
///
/// Sends a tiny "Hello" message with a minimal token budget.
///
/// # Errors
///
/// Returns the provider's error if it fails to respond.
pub async fn test_provider_connection(provider: &BoxLlmProvider) -> Result<(), LlmError> {
    let request = CompletionRequest {
        model: String::new(), // Provider uses its configured default
        messages: vec![Message {
            role: MessageRole::User,
            content: "Hello".to_string(),
        }],
        system: None,
        max_tokens: 10,
        temperature: Some(0.0),
        stream: false,
    };
    provider.complete(&request).await?;
    Ok(())
}
