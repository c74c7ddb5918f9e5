//! `copilot providers`: registered backends and their validation state.

use cp_domain::capability::ProviderDescriptor;
use cp_domain::config::Config;

use crate::bootstrap;

pub fn list(config: &Config) -> anyhow::Result<()> {
    if !bootstrap::is_active(config) {
        println!("copilot is inactive; no providers registered");
        return Ok(());
    }
    let registry = bootstrap::build_registry(&config.copilot)?;
    let default = registry.default_provider(config.copilot.dispatch.default_provider.as_deref());

    if registry.is_empty() {
        println!("no providers configured");
        return Ok(());
    }
    for descriptor in registry.descriptors() {
        let is_default = default.as_deref().is_ok_and(|d| d == descriptor.name);
        println!("{}", describe(descriptor, is_default));
    }
    Ok(())
}

fn describe(d: &ProviderDescriptor, is_default: bool) -> String {
    format!(
        "{name:<16} {state:<8} {mode:<10} window={window} min_prompt={min}{required}{default}",
        name = d.name,
        state = if d.config_valid { "ok" } else { "invalid" },
        mode = if d.capabilities.produces_images {
            "images"
        } else if d.capabilities.supports_streaming {
            "streaming"
        } else {
            "batch"
        },
        window = d.capabilities.context_window_tokens,
        min = d.capabilities.min_prompt_tokens,
        required = if d.required { " required" } else { "" },
        default = if is_default { " (default)" } else { "" },
    )
}
