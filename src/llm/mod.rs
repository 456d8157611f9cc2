pub mod anthropic;
pub mod gemini;
pub mod openai_compatible;

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use thiserror::Error;

use crate::config::LlmConfig;

pub const FALLBACK_ERROR: &str = "Error fetching response.";

// --- Model failure ---

/// Failure shapes a provider can produce. The variants mirror what arrives
/// on the wire rather than a fixed taxonomy.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request never completed; carries a direct message.
    #[error("{message}")]
    Transport { message: String },
    /// Non-success status with whatever body the provider sent.
    #[error("model API error ({status})")]
    Api { status: u16, body: Value },
    #[error("{0}")]
    Raw(String),
    #[error("model returned no text")]
    Empty,
}

impl ModelError {
    /// Human-readable description, first match wins: a direct message, then
    /// `response.error.message`, then `error.message`, then plain text.
    pub fn describe(&self) -> String {
        match self {
            ModelError::Transport { message } if !message.is_empty() => message.clone(),
            ModelError::Api { body, .. } => describe_value(body),
            ModelError::Raw(text) if !text.is_empty() => text.clone(),
            _ => FALLBACK_ERROR.to_string(),
        }
    }
}

fn describe_value(value: &Value) -> String {
    const PATHS: [&[&str]; 3] = [
        &["message"],
        &["response", "error", "message"],
        &["error", "message"],
    ];
    for path in PATHS {
        let found = path.iter().try_fold(value, |v, key| v.get(key));
        if let Some(message) = found.and_then(Value::as_str)
            && !message.is_empty()
        {
            return message.to_string();
        }
    }
    match value {
        Value::String(text) if !text.is_empty() => text.clone(),
        _ => FALLBACK_ERROR.to_string(),
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        ModelError::Transport {
            message: e.to_string(),
        }
    }
}

/// Turn a non-success HTTP response into a [`ModelError`], keeping the body
/// structured when it is JSON.
async fn error_from_response(response: reqwest::Response) -> ModelError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        return ModelError::Api {
            status,
            body: Value::Null,
        };
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(body) => ModelError::Api { status, body },
        Err(_) => ModelError::Raw(text),
    }
}

// --- LLM Client trait ---

/// One prompt in, one reply out.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

// --- Factory ---

/// Build the configured provider's client, or `None` when no API key is available.
pub fn create_client(config: &LlmConfig) -> Result<Option<Arc<dyn LlmClient>>> {
    create_client_with_key(config, config.resolve_api_key())
}

fn create_client_with_key(
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<Option<Arc<dyn LlmClient>>> {
    let Some(api_key) = api_key else {
        return Ok(None);
    };
    let client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "gemini" | "google" => Arc::new(gemini::GeminiClient::new(config, api_key)?),
        "anthropic" => Arc::new(anthropic::AnthropicClient::new(config, api_key)?),
        provider => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url(provider).to_string());
            Arc::new(openai_compatible::OpenAICompatibleClient::new(
                config, api_key, &base_url,
            )?)
        }
    };
    Ok(Some(client))
}

fn default_base_url(provider: &str) -> &str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "ollama" => "http://127.0.0.1:11434/v1",
        _ => "https://api.openai.com/v1",
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_describe_prefers_direct_message() {
        let err = ModelError::Api {
            status: 429,
            body: json!({
                "message": "rate limited",
                "error": {"message": "quota"}
            }),
        };
        assert_eq!(err.describe(), "rate limited");
    }

    #[test]
    fn test_describe_nested_response_error_before_error() {
        let err = ModelError::Api {
            status: 500,
            body: json!({
                "response": {"error": {"message": "backend down"}},
                "error": {"message": "generic"}
            }),
        };
        assert_eq!(err.describe(), "backend down");
    }

    #[test]
    fn test_describe_nested_error_message() {
        let err = ModelError::Api {
            status: 400,
            body: json!({"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}),
        };
        assert_eq!(err.describe(), "API key not valid");
    }

    #[test]
    fn test_describe_empty_message_falls_through() {
        let err = ModelError::Api {
            status: 400,
            body: json!({"message": "", "error": {"message": "real cause"}}),
        };
        assert_eq!(err.describe(), "real cause");
    }

    #[test]
    fn test_describe_plain_text() {
        assert_eq!(ModelError::Raw("upstream timeout".into()).describe(), "upstream timeout");
        let err = ModelError::Api {
            status: 502,
            body: Value::String("bad gateway".into()),
        };
        assert_eq!(err.describe(), "bad gateway");
    }

    #[test]
    fn test_describe_fallback() {
        assert_eq!(ModelError::Empty.describe(), FALLBACK_ERROR);
        assert_eq!(ModelError::Raw(String::new()).describe(), FALLBACK_ERROR);
        let err = ModelError::Api {
            status: 500,
            body: json!({"error": {"code": 500}}),
        };
        assert_eq!(err.describe(), FALLBACK_ERROR);
        let err = ModelError::Transport {
            message: String::new(),
        };
        assert_eq!(err.describe(), FALLBACK_ERROR);
    }

    #[test]
    fn test_create_client_without_key_is_none() {
        for provider in ["gemini", "anthropic", "openai"] {
            let config = LlmConfig {
                provider: provider.into(),
                api_key: None,
                ..Default::default()
            };
            assert!(create_client_with_key(&config, None).unwrap().is_none(), "{provider}");
        }
    }

    #[test]
    fn test_create_client_with_configured_key_ignores_env() {
        let config = LlmConfig {
            api_key: Some("from-config".into()),
            ..Default::default()
        };
        assert!(create_client(&config).unwrap().is_some());
    }

    #[test]
    fn test_create_client_with_key() {
        for provider in ["gemini", "anthropic", "openai", "ollama"] {
            let config = LlmConfig {
                provider: provider.into(),
                api_key: Some("k".into()),
                ..Default::default()
            };
            assert!(create_client(&config).unwrap().is_some(), "{provider}");
        }
    }
}
