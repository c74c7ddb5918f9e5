//! OpenAI-compatible streaming adapter.
//!
//! Speaks the `/chat/completions` contract with `stream: true` and
//! `stream_options.include_usage`, so the final SSE frame carries usage.

use std::sync::OnceLock;
use std::time::Duration;

use serde_json::Value;

use cp_domain::capability::ProviderCapabilities;
use cp_domain::config::ProviderConfig;
use cp_domain::error::{Error, Result};
use cp_domain::prompt::{Prompt, PromptMessage};
use cp_domain::stream::{BoxStream, Chunk, Usage};

use crate::sse::{self, SseEvent};
use crate::traits::{CopilotProvider, GenerateOptions};
use crate::util::{self, from_reqwest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiProvider {
    id: String,
    base_url: String,
    default_model: String,
    auth: cp_domain::config::AuthConfig,
    /// Resolved on first use (validation or the first request).
    api_key: OnceLock<String>,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("provider '{}': {e}", cfg.id)))?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
            auth: cfg.auth.clone(),
            api_key: OnceLock::new(),
            capabilities: ProviderCapabilities {
                supports_streaming: true,
                produces_images: false,
                ..cfg.capability_limits()
            },
            client,
        })
    }

    fn api_key(&self) -> Result<&str> {
        if let Some(key) = self.api_key.get() {
            return Ok(key);
        }
        let key = util::resolve_api_key(&self.auth)?;
        Ok(self.api_key.get_or_init(|| key))
    }

    fn build_body(&self, prompt: &Prompt, options: &GenerateOptions) -> Value {
        let messages: Vec<Value> = prompt.messages.iter().map(msg_to_openai).collect();
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(max) = options.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = options.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

fn msg_to_openai(msg: &PromptMessage) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE payload parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens")?.as_u64()? as u32;
    let completion = v.get("completion_tokens")?.as_u64()? as u32;
    let total = v
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as u32)
        .unwrap_or(prompt + completion);
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

/// Parse one `data:` payload into zero or more events.
fn parse_sse_data(provider: &str, data: &str) -> Vec<Result<SseEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(SseEvent::Done)];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(util::decode_error(provider, e))],
    };

    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("stream error")
            .to_string();
        return vec![Err(Error::ProviderUnavailable {
            provider: provider.to_owned(),
            message,
        })];
    }

    let mut events = Vec::new();

    if let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    {
        if let Some(text) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            if !text.is_empty() {
                events.push(Ok(SseEvent::Text(text.to_string())));
            }
        }
        if choice.get("finish_reason").and_then(|f| f.as_str()) == Some("content_filter") {
            events.push(Err(Error::ProviderContentRejected {
                provider: provider.to_owned(),
                message: "generation stopped by content filter".into(),
            }));
        }
    }

    // Usage-only frame (stream_options.include_usage) has empty choices.
    if let Some(usage) = v.get("usage").and_then(parse_usage) {
        events.push(Ok(SseEvent::Usage(usage)));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl CopilotProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn validate_config(&self, config: &ProviderConfig) -> Result<()> {
        if matches!(config.base_url.as_deref(), Some(url) if url.trim().is_empty()) {
            return Err(Error::Config("base_url must not be empty".into()));
        }
        if config.min_prompt_tokens > config.context_window_tokens {
            return Err(Error::Config(
                "min_prompt_tokens exceeds context_window_tokens".into(),
            ));
        }
        self.api_key().map(|_| ())
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(prompt, options);
        let key = self.api_key()?;

        tracing::debug!(
            provider = %self.id,
            url = %url,
            turn_id = options.turn_id.as_deref().unwrap_or("-"),
            messages = prompt.messages.len(),
            "openai stream request"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(&self.id, e))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(util::from_status(&self.id, status, &err_text));
        }

        let provider = self.id.clone();
        let parser_id = provider.clone();
        Ok(sse::sse_response_stream(provider, resp, move |data| {
            parse_sse_data(&parser_id, data)
        }))
    }
}
