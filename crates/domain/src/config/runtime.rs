use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System instructions placed first in every prompt.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: d_system_prompt(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Provider used when a request names none. `None` = first registered
    /// valid provider in config order.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Fixed pause before the single retry of a transient transport error.
    #[serde(default = "d_250")]
    pub retry_backoff_ms: u64,
    /// Maximum silence between two chunks before the call is treated as a
    /// transient transport failure.
    #[serde(default = "d_60000")]
    pub chunk_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            retry_backoff_ms: 250,
            chunk_timeout_ms: 60_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions with no activity for this many minutes expire. `None`
    /// disables idle expiry.
    #[serde(default = "d_idle_minutes")]
    pub idle_minutes: Option<u32>,
    /// Directory for `sessions.json` snapshots. `None` keeps sessions in
    /// memory only.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_minutes: d_idle_minutes(),
            state_path: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// How long a terminal buffer stays available for reconnecting readers.
    #[serde(default = "d_60")]
    pub retention_secs: u64,
    /// A buffer that receives no chunk for this long is reclaimed even if
    /// it never reached a terminal state.
    #[serde(default = "d_300")]
    pub idle_timeout_secs: u64,
    /// Interval of the background maintenance sweep.
    #[serde(default = "d_30")]
    pub sweep_interval_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60,
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_system_prompt() -> String {
    "You are a helpful writing assistant embedded in a collaborative document editor.".into()
}
fn d_250() -> u64 {
    250
}
fn d_60000() -> u64 {
    60_000
}
fn d_idle_minutes() -> Option<u32> {
    Some(60)
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_30() -> u64 {
    30
}
