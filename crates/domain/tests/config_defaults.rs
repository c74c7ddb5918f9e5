use cp_domain::config::{Config, PermissionPolicy, ProviderKind};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.server.graphql);
}

#[test]
fn copilot_enabled_by_default_with_no_providers() {
    let config = Config::default();
    assert!(config.copilot.enabled);
    assert!(config.copilot.providers.is_empty());
    assert_eq!(config.copilot.sessions.idle_minutes, Some(60));
    assert_eq!(config.copilot.dispatch.retry_backoff_ms, 250);
}

#[test]
fn providers_parse_from_toml() {
    let toml_str = r#"
[server]
graphql = true

[[copilot.providers]]
id = "openai"
kind = "openai"
required = true
default_model = "gpt-4o-mini"
auth = { env = "OPENAI_API_KEY" }

[[copilot.providers]]
id = "fal"
kind = "fal"
auth = { service = "copilot", account = "fal-api-key" }
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.copilot.providers.len(), 2);
    assert_eq!(config.copilot.providers[0].kind, ProviderKind::Openai);
    assert!(config.copilot.providers[0].required);
    assert_eq!(config.copilot.providers[1].kind, ProviderKind::Fal);
    assert!(!config.copilot.providers[1].required);
    assert_eq!(
        config.copilot.providers[1].auth.account.as_deref(),
        Some("fal-api-key")
    );
}

#[test]
fn access_sections_parse() {
    let toml_str = r#"
[copilot.quota]
default_limit = 50
tokens_per_cost_unit = 500

[copilot.quota.per_principal]
alice = 500

[copilot.permissions]
default_policy = "deny"
denied_principals = ["mallory"]

[copilot.permissions.workspace_members]
ws1 = ["alice", "bob"]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.copilot.quota.limit_for("alice"), Some(500));
    assert_eq!(config.copilot.quota.limit_for("bob"), Some(50));
    assert_eq!(config.copilot.permissions.default_policy, PermissionPolicy::Deny);
    assert!(config.copilot.permissions.denied_principals.contains("mallory"));
    assert_eq!(config.copilot.permissions.workspace_members["ws1"].len(), 2);
}

#[test]
fn disabled_host_surface_parses() {
    let toml_str = r#"
[server]
graphql = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(!config.server.graphql);
}
