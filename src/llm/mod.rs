//! LLM completion clients.
//!
//! One implementation per provider behind the `LlmClient` trait; the
//! provider enum is closed, so `create_client` covers every tag — unknown
//! provider strings are already rejected when the configuration loads.

pub mod providers;
pub mod types;

pub use providers::{AnthropicClient, LlmClient, OpenAiCompatClient};
pub use types::{ChatMessage, LlmResponse, MessageRole};

use crate::config::{LlmConfig, LlmProvider};

/// Create the completion client for the configured provider.
pub fn create_client(config: &LlmConfig) -> Box<dyn LlmClient> {
    tracing::info!(provider = config.provider.as_str(), "Creating LLM client");
    match config.provider {
        LlmProvider::Claude => Box::new(AnthropicClient::new(config)),
        LlmProvider::OpenAi => Box::new(OpenAiCompatClient::openai(config)),
        LlmProvider::Perplexity => Box::new(OpenAiCompatClient::perplexity(config)),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config(provider: LlmProvider, model: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: SecretString::from("test-key"),
            model: model.map(str::to_string),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    #[test]
    fn factory_uses_provider_default_models() {
        let claude = create_client(&config(LlmProvider::Claude, None));
        assert_eq!(claude.provider_name(), "claude");
        assert_eq!(claude.model_name(), providers::DEFAULT_CLAUDE_MODEL);

        let openai = create_client(&config(LlmProvider::OpenAi, None));
        assert_eq!(openai.provider_name(), "openai");
        assert_eq!(openai.model_name(), providers::DEFAULT_OPENAI_MODEL);

        let perplexity = create_client(&config(LlmProvider::Perplexity, None));
        assert_eq!(perplexity.provider_name(), "perplexity");
        assert_eq!(perplexity.model_name(), providers::DEFAULT_PERPLEXITY_MODEL);
    }

    #[test]
    fn factory_honors_model_override() {
        let client = create_client(&config(LlmProvider::Claude, Some("claude-3-opus-20240229")));
        assert_eq!(client.model_name(), "claude-3-opus-20240229");
    }
}
