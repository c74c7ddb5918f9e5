//! Provider registry.
//!
//! Built once at process start: every configured backend is registered,
//! then `validate_all` runs each provider's own configuration check. After
//! that the registry is frozen behind an `Arc` and only read.

use std::collections::HashMap;
use std::sync::Arc;

use cp_domain::capability::ProviderDescriptor;
use cp_domain::config::{CopilotConfig, ProviderConfig, ProviderKind};
use cp_domain::error::{Error, Result};
use cp_domain::trace::TraceEvent;

use crate::fal::FalProvider;
use crate::openai::OpenAiProvider;
use crate::traits::CopilotProvider;

struct Entry {
    descriptor: ProviderDescriptor,
    provider: Arc<dyn CopilotProvider>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registered providers, in registration order.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate and register the compiled-in adapter for every
    /// configured provider. Validation is a separate step.
    pub fn from_config(config: &CopilotConfig) -> Result<Self> {
        let mut registry = Self::new();

        for pc in &config.providers {
            let provider: Arc<dyn CopilotProvider> = match pc.kind {
                ProviderKind::Openai => Arc::new(OpenAiProvider::from_config(pc)?),
                ProviderKind::Fal => Arc::new(FalProvider::from_config(pc)?),
            };
            let descriptor = ProviderDescriptor {
                name: pc.id.clone(),
                capabilities: provider.capabilities().clone(),
                required: pc.required,
                config_valid: false,
            };
            registry.register(descriptor, provider)?;
        }

        Ok(registry)
    }

    /// Add a provider. Names are unique; there is no unregister.
    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn CopilotProvider>,
    ) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(Error::DuplicateProvider(descriptor.name));
        }

        TraceEvent::ProviderRegistered {
            provider: descriptor.name.clone(),
            required: descriptor.required,
            streaming: descriptor.capabilities.supports_streaming,
        }
        .emit();

        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor,
            provider,
        });
        Ok(())
    }

    /// Run every provider's configuration check against its entry in
    /// `config`.
    ///
    /// A required provider that fails aborts with `InvalidProviderConfig`.
    /// An optional one is marked invalid, logged, and excluded from
    /// [`resolve`](Self::resolve).
    pub fn validate_all(&mut self, config: &CopilotConfig) -> Result<()> {
        let by_id: HashMap<&str, &ProviderConfig> =
            config.providers.iter().map(|p| (p.id.as_str(), p)).collect();

        for entry in &mut self.entries {
            let name = entry.descriptor.name.clone();
            let outcome = match by_id.get(name.as_str()) {
                Some(pc) => entry.provider.validate_config(pc),
                None => Err(Error::Config("no configuration entry".into())),
            };

            entry.descriptor.config_valid = outcome.is_ok();
            TraceEvent::ProviderValidated {
                provider: name.clone(),
                valid: outcome.is_ok(),
            }
            .emit();

            if let Err(e) = outcome {
                if entry.descriptor.required {
                    return Err(Error::InvalidProviderConfig {
                        provider: name,
                        cause: e.to_string(),
                    });
                }
                tracing::warn!(
                    provider_id = %name,
                    error = %e,
                    "optional provider failed validation, skipping"
                );
            }
        }

        Ok(())
    }

    /// Look up a provider that passed validation.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CopilotProvider>> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::UnknownProvider(name.to_owned()))?;

        if !entry.descriptor.config_valid {
            return Err(Error::ProviderUnavailable {
                provider: name.to_owned(),
                message: "configuration did not validate".into(),
            });
        }
        Ok(entry.provider.clone())
    }

    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i].descriptor)
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    /// The provider to use when a request names none: `preferred` if set,
    /// otherwise the first valid provider in registration order.
    pub fn default_provider(&self, preferred: Option<&str>) -> Result<String> {
        if let Some(name) = preferred {
            self.resolve(name)?;
            return Ok(name.to_owned());
        }
        self.entries
            .iter()
            .find(|e| e.descriptor.config_valid)
            .map(|e| e.descriptor.name.clone())
            .ok_or_else(|| Error::UnknownProvider("<default>".into()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
