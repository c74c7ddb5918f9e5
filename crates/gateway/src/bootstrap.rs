//! Composition root: config validation, provider registration and the
//! explicit wiring of every copilot collaborator, plus the background
//! maintenance loop.
//!
//! Shared by the `chat` and `providers` CLI commands and by any host that
//! embeds the copilot feature.

use std::sync::Arc;

use anyhow::Context;

use cp_domain::config::{Config, ConfigSeverity, CopilotConfig, StreamConfig};
use cp_prompt::PromptBuilder;
use cp_providers::{ProviderDispatcher, ProviderRegistry};
use cp_sessions::SessionManager;

use crate::runtime::access::{AccessGate, PermissionService, QuotaService};
use crate::runtime::permission::ConfigPermissionService;
use crate::runtime::quota::QuotaLedger;
use crate::runtime::stream_cache::MessageStreamCache;
use crate::runtime::CopilotService;

/// The copilot feature is only wired when it is enabled and the host
/// exposes the API surface it plugs into.
pub fn is_active(config: &Config) -> bool {
    config.copilot.enabled && config.server.graphql
}

/// Validate config, register and validate providers, and return a wired
/// [`CopilotService`]. Returns `Ok(None)` when the feature is inactive.
pub fn build_copilot(config: &Config) -> anyhow::Result<Option<CopilotService>> {
    if !is_active(config) {
        tracing::info!(
            enabled = config.copilot.enabled,
            graphql = config.server.graphql,
            "copilot inactive"
        );
        return Ok(None);
    }

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Providers ────────────────────────────────────────────────────
    let registry = build_registry(&config.copilot)?;

    // ── Access control ───────────────────────────────────────────────
    let permissions: Arc<dyn PermissionService> = Arc::new(ConfigPermissionService::new(
        config.copilot.permissions.clone(),
    ));
    let quota: Arc<dyn QuotaService> = Arc::new(QuotaLedger::new(config.copilot.quota.clone()));

    wire(&config.copilot, registry, permissions, quota).map(Some)
}

/// Register the compiled-in adapter for every configured provider and
/// run their configuration checks.
pub fn build_registry(copilot: &CopilotConfig) -> anyhow::Result<ProviderRegistry> {
    let mut registry =
        ProviderRegistry::from_config(copilot).context("registering copilot providers")?;
    registry
        .validate_all(copilot)
        .context("validating copilot providers")?;

    let valid = registry.descriptors().filter(|d| d.config_valid).count();
    if valid == 0 {
        tracing::warn!("no copilot provider passed validation; every turn will fail");
    } else {
        tracing::info!(providers = registry.len(), valid, "provider registry ready");
    }
    Ok(registry)
}

/// Construct the collaborators around an already validated registry.
pub fn wire(
    copilot: &CopilotConfig,
    registry: ProviderRegistry,
    permissions: Arc<dyn PermissionService>,
    quota: Arc<dyn QuotaService>,
) -> anyhow::Result<CopilotService> {
    let registry = Arc::new(registry);
    let dispatcher = Arc::new(ProviderDispatcher::new(registry.clone(), &copilot.dispatch));
    let prompts = Arc::new(PromptBuilder::new(&copilot.prompt));

    let sessions = Arc::new(
        SessionManager::new(&copilot.sessions).context("initializing session manager")?,
    );
    tracing::info!(
        idle_minutes = ?copilot.sessions.idle_minutes,
        persisted = copilot.sessions.state_path.is_some(),
        restored = sessions.list().len(),
        "session manager ready"
    );

    let streams = Arc::new(MessageStreamCache::new(&copilot.stream));
    let gate = Arc::new(AccessGate::new(permissions, quota));

    Ok(CopilotService::new(
        registry,
        dispatcher,
        prompts,
        sessions,
        streams,
        gate,
        copilot.quota.clone(),
        copilot.dispatch.default_provider.clone(),
    ))
}

/// Spawn the periodic maintenance loop: idle-session expiry, stream
/// buffer reclamation and the session snapshot flush.
pub fn spawn_background_tasks(service: &CopilotService, stream: &StreamConfig) {
    let service = service.clone();
    let period = std::time::Duration::from_secs(stream.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let report = service.maintain().await;
            if report.expired_sessions > 0 || report.reclaimed_streams > 0 {
                tracing::debug!(
                    expired_sessions = report.expired_sessions,
                    reclaimed_streams = report.reclaimed_streams,
                    "maintenance sweep"
                );
            }
        }
    });
    tracing::info!(every_secs = period.as_secs(), "background tasks spawned");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_only_with_flag_and_host_surface() {
        let mut config = Config::default();
        config.copilot.enabled = true;
        config.server.graphql = true;
        assert!(is_active(&config));

        config.server.graphql = false;
        assert!(!is_active(&config));

        config.server.graphql = true;
        config.copilot.enabled = false;
        assert!(!is_active(&config));
    }

    #[test]
    fn inactive_config_builds_nothing() {
        let mut config = Config::default();
        config.copilot.enabled = false;
        assert!(build_copilot(&config).unwrap().is_none());
    }

    #[test]
    fn config_errors_refuse_to_boot() {
        let mut config = Config::default();
        config.copilot.enabled = true;
        config.copilot.quota.tokens_per_cost_unit = 0;
        let err = build_copilot(&config).err().unwrap();
        assert!(err.to_string().contains("config validation failed"));
    }

    #[test]
    fn required_provider_without_key_aborts() {
        let mut config = Config::default();
        config.copilot.enabled = true;
        let mut openai = cp_domain::config::ProviderConfig::openai_default();
        openai.required = true;
        openai.auth.env = Some("CP_TEST_KEY_THAT_IS_NEVER_SET".into());
        config.copilot.providers.push(openai);

        let err = build_copilot(&config).err().unwrap();
        assert!(format!("{err:#}").contains("validating copilot providers"));
    }
}
