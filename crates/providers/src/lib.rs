//! LLM Provider implementations for corvid.
//!
//! All providers implement the `corvid_core::Provider` trait.
//! The router builds the configured provider from `[llm]` settings.

pub mod anthropic;
pub mod openai_compat;
pub mod router;
pub mod sanitizer;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, default_base_url};

use corvid_core::error::ProviderError;
use std::time::Duration;

/// Seconds to wait after a 429 when the backend sends no `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

pub(crate) fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Classify a non-success HTTP status into a provider error.
pub(crate) fn map_status_error(status: u16, body: String, retry_after_secs: u64) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after_secs },
        401 | 403 => ProviderError::AuthenticationFailed(body),
        404 if body.to_lowercase().contains("model") => ProviderError::ModelNotFound(body),
        400 | 413 | 422 if ProviderError::is_context_overflow_message(&body) => {
            ProviderError::ContextOverflow(body)
        }
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}
