//! fal.ai image generation adapter.
//!
//! Not a streaming backend: one request, one response. The generated image
//! URLs come back as a single terminal chunk with the URLs as attachments.

use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use cp_domain::capability::ProviderCapabilities;
use cp_domain::config::{AuthConfig, ProviderConfig};
use cp_domain::error::{Error, Result};
use cp_domain::prompt::Prompt;
use cp_domain::stream::{BoxStream, Chunk};

use crate::traits::{CopilotProvider, GenerateOptions};
use crate::util::{self, from_reqwest};

const DEFAULT_BASE_URL: &str = "https://fal.run";
const DEFAULT_MODEL: &str = "fal-ai/flux/schnell";

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImage>,
}

pub struct FalProvider {
    id: String,
    base_url: String,
    default_model: String,
    auth: AuthConfig,
    api_key: OnceLock<String>,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl FalProvider {
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
                supports_streaming: false,
                produces_images: true,
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
}

/// Render the image URLs as the chunk's text.
fn describe_images(urls: &[String]) -> String {
    match urls.len() {
        0 => "No image was generated.".to_string(),
        1 => format!("Generated image: {}", urls[0]),
        _ => {
            let mut out = String::from("Generated images:");
            for url in urls {
                out.push_str("\n- ");
                out.push_str(url);
            }
            out
        }
    }
}

fn image_chunk(provider: &str, body: &str) -> Result<Chunk> {
    let parsed: FalResponse =
        serde_json::from_str(body).map_err(|e| util::decode_error(provider, e))?;
    let urls: Vec<String> = parsed.images.into_iter().map(|i| i.url).collect();

    let mut chunk = Chunk::terminal(0, None);
    chunk.delta = describe_images(&urls);
    chunk.attachments = urls;
    Ok(chunk)
}

#[async_trait::async_trait]
impl CopilotProvider for FalProvider {
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
        self.api_key().map(|_| ())
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let url = format!("{}/{}", self.base_url, model);
        let text = prompt.last_user_content().unwrap_or_default();
        let key = self.api_key()?;

        tracing::debug!(
            provider = %self.id,
            url = %url,
            turn_id = options.turn_id.as_deref().unwrap_or("-"),
            "fal image request"
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {key}"))
            .json(&serde_json::json!({ "prompt": text, "num_images": 1 }))
            .send()
            .await
            .map_err(|e| from_reqwest(&self.id, e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| from_reqwest(&self.id, e))?;
        if !status.is_success() {
            return Err(util::from_status(&self.id, status, &body));
        }

        let chunk = image_chunk(&self.id, &body)?;
        Ok(Box::pin(futures_util::stream::iter([Ok(chunk)])))
    }
}
