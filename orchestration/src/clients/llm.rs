//! LLM client seam with provider fallback.
//!
//! Two concrete HTTP providers plus a composable fallback wrapper: attempt
//! the primary, on any error attempt the secondary, and annotate the result
//! with the provider that actually served it. Token usage always flows back
//! so the caller can persist it.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{CollaboratorError, CollaboratorResult};

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 4000,
            temperature: 0.2,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A completion with usage accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    /// Provider that actually served the request (after any fallback).
    pub provider_used: String,
    pub model: String,
}

/// Capability set the orchestrator needs from a language model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> CollaboratorResult<Completion>;

    /// Optional embedding capability; providers without it return an error
    /// and callers treat embeddings as best-effort.
    async fn embed(&self, _text: &str) -> CollaboratorResult<Vec<f32>> {
        Err(CollaboratorError::unavailable(format!(
            "{} does not support embeddings",
            self.provider_name()
        )))
    }
}

/// OpenAI-compatible chat-completions provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> CollaboratorResult<Completion> {
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": request.prompt}],
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CollaboratorError::invalid("missing choices[0].message.content"))?
            .to_string();

        Ok(Completion {
            content,
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            latency_ms: started.elapsed().as_millis() as u64,
            provider_used: self.provider_name().to_string(),
            model: self.model.clone(),
        })
    }

    async fn embed(&self, text: &str) -> CollaboratorResult<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"model": "text-embedding-3-small", "input": text}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let embedding = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| CollaboratorError::invalid("missing data[0].embedding"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }
}

/// Anthropic messages-API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmClient for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> CollaboratorResult<Completion> {
        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "messages": [{"role": "user", "content": request.prompt}],
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), body));
        }

        let body: serde_json::Value = response.json().await?;
        let content = body["content"][0]["text"]
            .as_str()
            .ok_or_else(|| CollaboratorError::invalid("missing content[0].text"))?
            .to_string();

        Ok(Completion {
            content,
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            latency_ms: started.elapsed().as_millis() as u64,
            provider_used: self.provider_name().to_string(),
            model: self.model.clone(),
        })
    }
}

/// Fallback wrapper: primary first, secondary on any error, error only when
/// both fail. `provider_used` on the completion reports which tier served.
pub struct FallbackLlm {
    primary: Arc<dyn LlmClient>,
    secondary: Arc<dyn LlmClient>,
}

impl FallbackLlm {
    pub fn new(primary: Arc<dyn LlmClient>, secondary: Arc<dyn LlmClient>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl LlmClient for FallbackLlm {
    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }

    fn model_name(&self) -> &str {
        self.primary.model_name()
    }

    async fn complete(&self, request: &CompletionRequest) -> CollaboratorResult<Completion> {
        match self.primary.complete(request).await {
            Ok(completion) => {
                debug!(provider = %completion.provider_used, "Primary provider served");
                Ok(completion)
            }
            Err(primary_err) => {
                warn!(
                    primary = self.primary.provider_name(),
                    error = %primary_err,
                    "Primary provider failed, trying secondary"
                );
                match self.secondary.complete(request).await {
                    Ok(completion) => Ok(completion),
                    Err(secondary_err) => Err(CollaboratorError::unavailable(format!(
                        "all providers failed: {} ({}), {} ({})",
                        self.primary.provider_name(),
                        primary_err,
                        self.secondary.provider_name(),
                        secondary_err
                    ))),
                }
            }
        }
    }

    async fn embed(&self, text: &str) -> CollaboratorResult<Vec<f32>> {
        match self.primary.embed(text).await {
            Ok(embedding) => Ok(embedding),
            Err(_) => self.secondary.embed(text).await,
        }
    }
}

/// Strip optional ```json fences from an LLM reply before parsing.
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        name: &'static str,
        fail: bool,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                fail,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedProvider {
        fn provider_name(&self) -> &str {
            self.name
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &CompletionRequest) -> CollaboratorResult<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollaboratorError::api(500, "boom"));
            }
            Ok(Completion {
                content: "ok".to_string(),
                input_tokens: 10,
                output_tokens: 5,
                latency_ms: 1,
                provider_used: self.name.to_string(),
                model: "scripted".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fallback_uses_primary_when_healthy() {
        let primary = Arc::new(ScriptedProvider::new("primary", false));
        let secondary = Arc::new(ScriptedProvider::new("secondary", false));
        let llm = FallbackLlm::new(primary.clone(), secondary.clone());

        let completion = llm
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(completion.provider_used, "primary");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_switches_on_primary_error() {
        let primary = Arc::new(ScriptedProvider::new("primary", true));
        let secondary = Arc::new(ScriptedProvider::new("secondary", false));
        let llm = FallbackLlm::new(primary, secondary);

        let completion = llm
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(completion.provider_used, "secondary");
    }

    #[tokio::test]
    async fn test_fallback_errors_when_both_fail() {
        let primary = Arc::new(ScriptedProvider::new("primary", true));
        let secondary = Arc::new(ScriptedProvider::new("secondary", true));
        let llm = FallbackLlm::new(primary, secondary);

        let err = llm
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("all providers failed"));
    }

    #[test]
    fn test_strip_json_fences() {
        assert_eq!(strip_json_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
