use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quota
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Usage quota, measured in cost units.
///
/// `default_limit = None` leaves principals without an override uncapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub default_limit: Option<u64>,
    /// Per-principal overrides keyed by principal id.
    #[serde(default)]
    pub per_principal: HashMap<String, u64>,
    /// Tokens that make up one cost unit.
    #[serde(default = "d_1000")]
    pub tokens_per_cost_unit: u32,
    /// Expected reply size used when estimating the cost of a turn before
    /// dispatch.
    #[serde(default = "d_512")]
    pub estimated_output_tokens: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limit: None,
            per_principal: HashMap::new(),
            tokens_per_cost_unit: 1_000,
            estimated_output_tokens: 512,
        }
    }
}

impl QuotaConfig {
    /// Convert a token count to cost units, rounding up.
    pub fn cost_of(&self, tokens: u32) -> u64 {
        let unit = self.tokens_per_cost_unit.max(1) as u64;
        (tokens as u64).div_ceil(unit)
    }

    pub fn limit_for(&self, principal: &str) -> Option<u64> {
        self.per_principal
            .get(principal)
            .copied()
            .or(self.default_limit)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Applied to workspaces without an explicit member list.
    #[serde(default = "d_allow")]
    pub default_policy: PermissionPolicy,
    /// Principals that are always denied.
    #[serde(default)]
    pub denied_principals: HashSet<String>,
    /// Workspace id → principals allowed to use the copilot there.
    #[serde(default)]
    pub workspace_members: HashMap<String, HashSet<String>>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_policy: PermissionPolicy::Allow,
            denied_principals: HashSet::new(),
            workspace_members: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    Allow,
    Deny,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> u32 {
    1_000
}
fn d_512() -> u32 {
    512
}
fn d_allow() -> PermissionPolicy {
    PermissionPolicy::Allow
}
