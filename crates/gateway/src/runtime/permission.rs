//! Config-driven permission service.

use cp_domain::config::{PermissionPolicy, PermissionsConfig};
use cp_domain::error::Result;

use crate::runtime::access::{PermissionDecision, PermissionService};

/// Decides from `[copilot.permissions]`:
///
/// 1. principals in `denied_principals` are always denied
/// 2. workspaces with a member list admit only their members
/// 3. everything else gets `default_policy`
pub struct ConfigPermissionService {
    config: PermissionsConfig,
}

impl ConfigPermissionService {
    pub fn new(config: PermissionsConfig) -> Self {
        Self { config }
    }

    pub fn decide(&self, principal: &str, workspace: &str) -> PermissionDecision {
        if self.config.denied_principals.contains(principal) {
            return PermissionDecision::Deny;
        }
        if let Some(members) = self.config.workspace_members.get(workspace) {
            return if members.contains(principal) {
                PermissionDecision::Allow
            } else {
                PermissionDecision::Deny
            };
        }
        match self.config.default_policy {
            PermissionPolicy::Allow => PermissionDecision::Allow,
            PermissionPolicy::Deny => PermissionDecision::Deny,
        }
    }
}

#[async_trait::async_trait]
impl PermissionService for ConfigPermissionService {
    async fn check(
        &self,
        principal: &str,
        workspace: &str,
        _action: &str,
    ) -> Result<PermissionDecision> {
        Ok(self.decide(principal, workspace))
    }
}
