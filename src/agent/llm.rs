//! Chat-completions client for OpenAI-compatible providers (OpenRouter, Gemini)

use anyhow::{Result, Context, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

// ============ Provider Configuration ============

/// Configuration for an LLM API provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL for the API (e.g., "https://openrouter.ai/api/v1")
    pub base_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Extra headers to include in requests (e.g., X-Title, HTTP-Referer)
    pub extra_headers: Vec<(String, String)>,
    /// Whether to include `transforms: []` in requests (OpenRouter-specific)
    pub include_transforms: bool,
}

impl ProviderConfig {
    /// Create an OpenRouter provider configuration
    pub fn openrouter(api_key: String) -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key,
            extra_headers: vec![
                ("HTTP-Referer".to_string(), "https://github.com/news-select".to_string()),
                ("X-Title".to_string(), "News Select".to_string()),
            ],
            include_transforms: true,
        }
    }

    /// Create a provider for Gemini's OpenAI-compatible endpoint
    pub fn gemini(api_key: String) -> Self {
        Self {
            base_url: GEMINI_OPENAI_BASE_URL.to_string(),
            api_key,
            extra_headers: Vec::new(),
            include_transforms: false,
        }
    }

    /// Any other OpenAI-compatible endpoint
    pub fn custom(api_key: String, base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            extra_headers: Vec::new(),
            include_transforms: false,
        }
    }

    /// Pick a preset from a base URL, keeping OpenRouter's extra headers
    pub fn for_base_url(api_key: String, base_url: &str) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed == OPENROUTER_BASE_URL {
            Self::openrouter(api_key)
        } else if trimmed == GEMINI_OPENAI_BASE_URL {
            Self::gemini(api_key)
        } else {
            Self::custom(api_key, trimmed.to_string())
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transforms: Option<Vec<serde_json::Value>>,
}

/// LLM API client (OpenRouter, Gemini, and other OpenAI-compatible providers)
#[derive(Clone)]
pub struct ChatClient {
    client: Arc<Client>,
    provider: ProviderConfig,
}

impl ChatClient {
    /// Create a client with a request timeout
    pub fn with_timeout(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            provider: config,
        })
    }

    /// Send a chat completion request and return the assistant text
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens,
            temperature,
            transforms: if self.provider.include_transforms { Some(vec![]) } else { None },
        };

        let mut req_builder = self.client
            .post(format!("{}/chat/completions", self.provider.base_url))
            .header("Authorization", format!("Bearer {}", self.provider.api_key));
        for (key, value) in &self.provider.extra_headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to send request to LLM provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error ({}): {}", status, crate::truncate_safe(&body, 500));
        }

        let body = response.text().await.context("Failed to read response body")?;

        if std::env::var("DEBUG_LLM_RESPONSES").is_ok() {
            tracing::debug!("LLM response: {}", crate::truncate_safe(&body, 2000));
        }

        let raw_response: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| {
                anyhow::anyhow!("Failed to parse JSON response: {} (body: {})",
                    e, crate::truncate_safe(&body, 500))
            })?;

        Ok(extract_content(&raw_response))
    }
}

/// Pull the first choice's text out of a chat-completions response.
/// Handles both string content and array-of-content-parts formats.
pub fn extract_content(raw_response: &serde_json::Value) -> String {
    let content_value = raw_response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"));

    match content_value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => {
            parts.iter().filter_map(|part| {
                if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                    part.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                } else {
                    None
                }
            }).collect::<Vec<_>>().join("")
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_creation() {
        let msg = ChatMessage::system("be strict");
        assert_eq!(msg.role, "system");
        assert_eq!(msg.content, "be strict");
        assert_eq!(ChatMessage::user("hi").role, "user");
    }

    #[test]
    fn test_provider_presets() {
        let or = ProviderConfig::for_base_url("k".into(), "https://openrouter.ai/api/v1/");
        assert!(or.include_transforms);
        assert_eq!(or.extra_headers.len(), 2);

        let gemini = ProviderConfig::for_base_url("k".into(), GEMINI_OPENAI_BASE_URL);
        assert!(!gemini.include_transforms);

        let local = ProviderConfig::for_base_url("k".into(), "http://localhost:11434/v1/");
        assert_eq!(local.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_request_omits_unset_fields() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("x")],
            max_tokens: None,
            temperature: Some(0.2),
            transforms: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("transforms").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_extract_content_string() {
        let raw = serde_json::json!({"choices": [{"message": {"content": "{\"score\": 7}"}}]});
        assert_eq!(extract_content(&raw), "{\"score\": 7}");
    }

    #[test]
    fn test_extract_content_parts() {
        let raw = serde_json::json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "Hello "},
            {"type": "image_url", "image_url": {"url": "data:..."}},
            {"type": "text", "text": "world"}
        ]}}]});
        assert_eq!(extract_content(&raw), "Hello world");
    }

    #[test]
    fn test_extract_content_missing() {
        assert_eq!(extract_content(&serde_json::json!({"error": "quota"})), "");
    }
}
