use crate::config::LlmConfig;
use crate::error::{Result, ValidatorError};
use async_trait::async_trait;
use tracing::warn;

/// Generative/classification backend shared by every stage.
///
/// Implementations may queue concurrent calls; callers add no locking of
/// their own. Output is untrusted and may be wrapped in markup.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions client for OpenAI-compatible endpoints (OpenAI, Ollama `/v1`).
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ValidatorError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ValidatorError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ValidatorError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(ValidatorError::Llm(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| ValidatorError::Llm(format!("No choices in LLM response: {}", response_json)))?;

        if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("length") {
            warn!("LLM response was truncated due to length limit");
        }

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| ValidatorError::Llm("No content in LLM response".to_string()))?;

        if content.trim().is_empty() {
            return Err(ValidatorError::Llm("Empty content in LLM response".to_string()));
        }

        Ok(content.to_string())
    }
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````) if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = &trimmed[3..];
    // Drop the info string ("json", "sql", ...) on the opening line.
    let inner = match inner.find('\n') {
        Some(pos) if inner[..pos].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &inner[pos + 1..],
        _ => inner.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match inner.find("```") {
        Some(end) => inner[..end].trim(),
        None => inner.trim(),
    }
}
