use serde::{Deserialize, Serialize};

/// Capabilities every provider advertises. The dispatcher and prompt
/// builder consult these instead of matching on provider names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Whether output arrives incrementally. Non-streaming providers emit a
    /// single terminal chunk.
    pub supports_streaming: bool,
    /// Produces image attachments rather than (or as well as) text.
    pub produces_images: bool,
    /// Maximum context length in tokens.
    pub context_window_tokens: u32,
    /// Tokens held back from the context window for the reply.
    pub reserve_output_tokens: u32,
    /// The smallest prompt budget this provider guarantees. A new turn that
    /// alone exceeds this is rejected outright.
    pub min_prompt_tokens: u32,
}

impl ProviderCapabilities {
    /// Tokens available for the rendered prompt.
    pub fn prompt_budget(&self) -> u32 {
        self.context_window_tokens
            .saturating_sub(self.reserve_output_tokens)
            .max(self.min_prompt_tokens)
    }
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_streaming: false,
            produces_images: false,
            context_window_tokens: 8_192,
            reserve_output_tokens: 1_024,
            min_prompt_tokens: 512,
        }
    }
}

/// Static description of a registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique registry key.
    pub name: String,
    pub capabilities: ProviderCapabilities,
    /// A required provider that fails validation aborts startup.
    pub required: bool,
    /// Result of the provider's own configuration check.
    pub config_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_budget_reserves_output() {
        let caps = ProviderCapabilities {
            context_window_tokens: 4_096,
            reserve_output_tokens: 1_096,
            min_prompt_tokens: 256,
            ..Default::default()
        };
        assert_eq!(caps.prompt_budget(), 3_000);
    }

    #[test]
    fn prompt_budget_never_below_minimum() {
        let caps = ProviderCapabilities {
            context_window_tokens: 1_000,
            reserve_output_tokens: 2_000,
            min_prompt_tokens: 300,
            ..Default::default()
        };
        assert_eq!(caps.prompt_budget(), 300);
    }
}
