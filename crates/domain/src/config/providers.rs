use serde::{Deserialize, Serialize};

use crate::capability::ProviderCapabilities;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key, e.g. `"openai"`.
    pub id: String,
    pub kind: ProviderKind,
    /// A required provider that fails validation aborts startup; an
    /// optional one is skipped with a warning.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "d_context_window")]
    pub context_window_tokens: u32,
    #[serde(default = "d_reserve_output")]
    pub reserve_output_tokens: u32,
    #[serde(default = "d_min_prompt")]
    pub min_prompt_tokens: u32,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProviderConfig {
    /// A minimal OpenAI entry reading `OPENAI_API_KEY`.
    pub fn openai_default() -> Self {
        Self {
            id: "openai".into(),
            kind: ProviderKind::Openai,
            required: true,
            base_url: None,
            default_model: None,
            auth: AuthConfig {
                env: Some("OPENAI_API_KEY".into()),
                ..Default::default()
            },
            context_window_tokens: d_context_window(),
            reserve_output_tokens: d_reserve_output(),
            min_prompt_tokens: d_min_prompt(),
            timeout_ms: d_timeout_ms(),
        }
    }

    /// Capability limits derived from this entry. `supports_streaming` and
    /// `produces_images` are filled in by the concrete provider.
    pub fn capability_limits(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            context_window_tokens: self.context_window_tokens,
            reserve_output_tokens: self.reserve_output_tokens,
            min_prompt_tokens: self.min_prompt_tokens,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions with SSE streaming.
    Openai,
    /// fal.ai image generation.
    Fal,
}

/// Where a provider's API key comes from.
///
/// Precedence: `key` → keychain (`service` + `account`) → `env` →
/// `{SERVICE}_{ACCOUNT}` env fallback.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g., "copilot").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g., "openai-api-key").
    #[serde(default)]
    pub account: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_context_window() -> u32 {
    128_000
}
fn d_reserve_output() -> u32 {
    4_096
}
fn d_min_prompt() -> u32 {
    1_024
}
fn d_timeout_ms() -> u64 {
    120_000
}
