use cp_domain::config::{Config, ConfigSeverity};

/// Validate the config and print any issues. Returns `false` when at
/// least one error was found.
///
/// Provider credentials are checked too when the copilot feature is
/// active, since a required provider that fails its own check aborts boot.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    let provider_error = if crate::bootstrap::is_active(config) {
        crate::bootstrap::build_registry(&config.copilot)
            .err()
            .map(|e| format!("{e:#}"))
    } else {
        None
    };

    if let Some(e) = &provider_error {
        println!("[ERROR] copilot.providers: {e}");
    }

    if issues.is_empty() && provider_error.is_none() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count()
        + usize::from(provider_error.is_some());
    let warning_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Warning)
        .count();

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
/// Plaintext provider keys are masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut masked = config.clone();
    for p in &mut masked.copilot.providers {
        if p.auth.key.is_some() {
            p.auth.key = Some("********".into());
        }
    }
    let output = toml::to_string_pretty(&masked)?;
    print!("{output}");
    Ok(())
}
