//! Shared utility functions for provider adapters.

use cp_domain::config::AuthConfig;
use cp_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the normalized provider taxonomy.
///
/// Connection, timeout and mid-body failures are transient transport
/// errors; a body that cannot be decoded is not.
pub(crate) fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    let transient = !e.is_decode() && !e.is_builder();
    Error::ProviderTransport {
        provider: provider.to_owned(),
        message: e.to_string(),
        transient,
    }
}

/// Map a non-success HTTP status (plus response body) to a provider error.
pub(crate) fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let provider = provider.to_owned();
    let message = format!("HTTP {} - {}", status.as_u16(), truncate(body, 512));
    match status.as_u16() {
        429 => Error::ProviderRateLimited { provider, message },
        400 | 422 if mentions_content_policy(body) => {
            Error::ProviderContentRejected { provider, message }
        }
        408 => Error::ProviderTransport {
            provider,
            message,
            transient: true,
        },
        _ => Error::ProviderUnavailable { provider, message },
    }
}

/// A JSON payload that could not be decoded.
pub(crate) fn decode_error(provider: &str, e: serde_json::Error) -> Error {
    Error::ProviderTransport {
        provider: provider.to_owned(),
        message: format!("invalid response payload: {e}"),
        transient: false,
    }
}

fn mentions_content_policy(body: &str) -> bool {
    body.contains("content_filter") || body.contains("content_policy")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext, warns)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field (reads environment variable)
/// 4. Fallback for keychain mode: env var `{SERVICE}_{ACCOUNT}` uppercased
/// 5. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key'; \
             prefer 'env' or keychain instead"
        );
        return Ok(key.clone());
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::debug!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{}' not set or not valid UTF-8",
                env_var
            ))
        });
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            tracing::info!(
                env_var = %fallback_var,
                "API key resolved from keychain headless fallback env var"
            );
            return Ok(val);
        }
    }

    Err(Error::Auth(
        "no API key configured: set 'key', 'env', or keychain \
         'service'+'account' in the provider's auth section"
            .into(),
    ))
}

/// Read a secret from the OS keychain.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// Headless fallback env var name for a keychain service/account.
///
/// Example: `("copilot", "fal-api-key")` → `"COPILOT_FAL_API_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn fallback_env_name_basic() {
        assert_eq!(
            keychain_fallback_env_name("copilot", "fal-api-key"),
            "COPILOT_FAL_API_KEY"
        );
    }

    #[test]
    fn plaintext_key_wins() {
        let auth = AuthConfig {
            key: Some("plaintext-wins".into()),
            env: Some("CP_TEST_SHOULD_NOT_BE_READ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "plaintext-wins");
    }

    #[test]
    fn env_var_key() {
        let var_name = "CP_TEST_RESOLVE_ENV_KEY_4411";
        std::env::set_var(var_name, "env-secret");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret");
        std::env::remove_var(var_name);
    }

    #[test]
    fn missing_env_var_names_it() {
        let auth = AuthConfig {
            env: Some("CP_TEST_NONEXISTENT_VAR_9031".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("CP_TEST_NONEXISTENT_VAR_9031"));
    }

    #[test]
    fn no_auth_configured() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn keychain_headless_fallback() {
        let fallback_var = "COPILOT_CP_TEST_FALLBACK";
        std::env::set_var(fallback_var, "fallback-secret");
        let auth = AuthConfig {
            service: Some("copilot".into()),
            account: Some("cp-test-fallback".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "fallback-secret");
        std::env::remove_var(fallback_var);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            from_status("p", StatusCode::TOO_MANY_REQUESTS, ""),
            Error::ProviderRateLimited { .. }
        ));
        assert!(matches!(
            from_status("p", StatusCode::BAD_REQUEST, r#"{"error":{"code":"content_filter"}}"#),
            Error::ProviderContentRejected { .. }
        ));
        assert!(matches!(
            from_status("p", StatusCode::BAD_REQUEST, "bad json"),
            Error::ProviderUnavailable { .. }
        ));
        assert!(matches!(
            from_status("p", StatusCode::UNAUTHORIZED, ""),
            Error::ProviderUnavailable { .. }
        ));
        assert!(matches!(
            from_status("p", StatusCode::SERVICE_UNAVAILABLE, ""),
            Error::ProviderUnavailable { .. }
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 100), "short");
    }
}
