mod access;
mod providers;
mod runtime;
mod server;

pub use access::*;
pub use providers::*;
pub use runtime::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub copilot: CopilotConfig,
}

/// The copilot feature: providers, prompt shaping, dispatch policy,
/// session/stream lifetimes and access control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotConfig {
    /// Master switch. The feature is additionally gated on the host
    /// server exposing its API surface (`server.graphql`).
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Registered backends (data-driven: adding a backend = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: Vec::new(),
            prompt: PromptConfig::default(),
            dispatch: DispatchConfig::default(),
            sessions: SessionsConfig::default(),
            stream: StreamConfig::default(),
            quota: QuotaConfig::default(),
            permissions: PermissionsConfig::default(),
        }
    }
}

fn d_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Structural checks only; provider credentials are checked by each
    /// provider's own `validate_config` at registry startup.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        let copilot = &self.copilot;
        if copilot.enabled && copilot.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "copilot.providers".into(),
                message: "no copilot providers configured".into(),
            });
        }

        let mut seen = HashSet::new();
        for (i, p) in copilot.providers.iter().enumerate() {
            if p.id.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("copilot.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            } else if !seen.insert(p.id.as_str()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("copilot.providers[{i}].id"),
                    message: format!("duplicate provider id '{}'", p.id),
                });
            }
            if p.min_prompt_tokens > p.context_window_tokens {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("copilot.providers[{i}].min_prompt_tokens"),
                    message: "min_prompt_tokens exceeds context_window_tokens".into(),
                });
            }
        }

        if let Some(default) = &copilot.dispatch.default_provider {
            if !copilot.providers.iter().any(|p| &p.id == default) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "copilot.dispatch.default_provider".into(),
                    message: format!("'{default}' is not a configured provider"),
                });
            }
        }

        if copilot.quota.tokens_per_cost_unit == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "copilot.quota.tokens_per_cost_unit".into(),
                message: "must be greater than 0".into(),
            });
        }

        if copilot.stream.sweep_interval_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "copilot.stream.sweep_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if copilot.sessions.idle_minutes == Some(0) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "copilot.sessions.idle_minutes".into(),
                message: "0 expires every session on the next sweep".into(),
            });
        }

        errors
    }
}
