use cp_domain::capability::ProviderCapabilities;
use cp_domain::config::ProviderConfig;
use cp_domain::error::Result;
use cp_domain::prompt::Prompt;
use cp_domain::stream::{BoxStream, Chunk};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call knobs passed alongside the prompt.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Turn being generated, for log correlation only.
    pub turn_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every AI backend must implement.
///
/// `generate` returns a finite stream of chunks. Errors are already
/// normalized into the provider taxonomy (`ProviderUnavailable`,
/// `ProviderRateLimited`, `ProviderContentRejected`, `ProviderTransport`).
/// Dropping the stream stops the underlying request.
#[async_trait::async_trait]
pub trait CopilotProvider: Send + Sync {
    /// Registry key for this provider instance.
    fn name(&self) -> &str;

    fn capabilities(&self) -> &ProviderCapabilities;

    /// Check that `config` is usable (credentials resolvable, URLs set).
    fn validate_config(&self, config: &ProviderConfig) -> Result<()>;

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>>;
}
