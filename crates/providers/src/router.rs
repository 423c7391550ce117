//! Provider selection: builds the configured LLM backend from `[llm]`.

use std::sync::Arc;
use std::time::Duration;

use corvid_config::LlmConfig;
use corvid_core::error::ProviderError;
use corvid_core::provider::Provider;
use tracing::info;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider named by `config.provider`.
///
/// Hosted backends need an API key; local servers (ollama, vllm, lmstudio)
/// do not. Any other name is treated as an OpenAI-compatible endpoint and
/// requires `base_url`.
pub fn build_from_config(config: &LlmConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let name = config.provider.as_str();
    let key = config.api_key.clone().filter(|k| !k.is_empty());
    let require_key = || {
        key.clone().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set llm.api_key or CORVID_API_KEY)"
            ))
        })
    };

    let provider: Arc<dyn Provider> = match name {
        "anthropic" => {
            let mut p = AnthropicProvider::new(require_key()?).with_timeout(timeout);
            if let Some(url) = &config.base_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        "openai" | "openrouter" => {
            let base_url = config
                .base_url
                .clone()
                .or_else(|| default_base_url(name))
                .unwrap_or_default();
            Arc::new(
                OpenAiCompatProvider::new(name, base_url, Some(require_key()?))
                    .with_timeout(timeout),
            )
        }
        "ollama" | "vllm" | "lmstudio" => {
            let base_url = config
                .base_url
                .clone()
                .or_else(|| default_base_url(name))
                .unwrap_or_default();
            Arc::new(OpenAiCompatProvider::new(name, base_url, key).with_timeout(timeout))
        }
        custom => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "provider '{custom}' is not built in; set llm.base_url to its OpenAI-compatible endpoint"
                ))
            })?;
            Arc::new(OpenAiCompatProvider::new(custom, base_url, key).with_timeout(timeout))
        }
    };

    info!(provider = %provider.name(), model = %config.model, "LLM provider ready");
    Ok(provider)
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "anthropic" => crate::anthropic::DEFAULT_BASE_URL,
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "vllm" => "http://localhost:8000/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => return None,
    };
    Some(url.to_string())
}
