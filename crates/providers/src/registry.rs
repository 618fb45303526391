//! Provider manager.
//!
//! Constructs one adapter per configured profile and resolves effective
//! capabilities (`defaults(family) ⊕ hints ⊕ adapter override`). Profiles
//! that fail to initialize are recorded and skipped, never fatal.

use std::collections::HashMap;
use std::sync::Arc;

use drost_domain::capability::{self, Capabilities};
use drost_domain::config::{ProviderKind, ProviderProfile};
use drost_domain::{Error, Result};

use crate::mock::ScriptedAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::traits::{ProbeResult, ProviderAdapter};

/// Records a profile that failed to initialize.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub error: String,
}

struct Binding {
    adapter: Arc<dyn ProviderAdapter>,
    profile: ProviderProfile,
    capabilities: Capabilities,
}

/// Holds every instantiated provider adapter with its resolved capability
/// set.
pub struct ProviderManager {
    bindings: HashMap<String, Binding>,
    default_provider_id: Option<String>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderManager {
    /// Build the manager from configured profiles. The first profile that
    /// initializes becomes the default provider.
    pub fn from_profiles(profiles: &[ProviderProfile]) -> Self {
        let mut manager = Self {
            bindings: HashMap::new(),
            default_provider_id: None,
            init_errors: Vec::new(),
        };

        for profile in profiles {
            let built: Result<Arc<dyn ProviderAdapter>> = match profile.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatAdapter::from_profile(profile)
                    .map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
                ProviderKind::Mock => Ok(Arc::new(ScriptedAdapter::always_text(
                    profile.id.clone(),
                    "[mock reply]",
                )) as Arc<dyn ProviderAdapter>),
            };

            match built {
                Ok(adapter) => {
                    tracing::info!(provider_id = %profile.id, kind = ?profile.kind, "registered provider");
                    manager.bind(profile.clone(), adapter);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %profile.id,
                        error = %e,
                        "failed to initialize provider, skipping"
                    );
                    manager.init_errors.push(ProviderInitError {
                        provider_id: profile.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        manager
    }

    /// Register an adapter under a profile. Used by `from_profiles` and by
    /// tests that inject scripted adapters.
    pub fn bind(&mut self, profile: ProviderProfile, adapter: Arc<dyn ProviderAdapter>) {
        let capabilities = capability::resolve(
            profile.family,
            profile.capability_hints.as_ref(),
            adapter.supports_native_tool_calls(),
        );
        if self.default_provider_id.is_none() {
            self.default_provider_id = Some(profile.id.clone());
        }
        self.bindings.insert(
            profile.id.clone(),
            Binding {
                adapter,
                profile,
                capabilities,
            },
        );
    }

    /// Look up an adapter by provider id.
    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.bindings
            .get(provider_id)
            .map(|b| b.adapter.clone())
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_owned()))
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.bindings.contains_key(provider_id)
    }

    /// Resolved capability set for a provider.
    pub fn capabilities(&self, provider_id: &str) -> Result<Capabilities> {
        self.bindings
            .get(provider_id)
            .map(|b| b.capabilities)
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_owned()))
    }

    /// The default provider for new sessions.
    pub fn default_provider_id(&self) -> Option<&str> {
        self.default_provider_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Sorted provider ids.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bindings.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The profile backing a provider id.
    pub fn profile(&self, provider_id: &str) -> Option<&ProviderProfile> {
        self.bindings.get(provider_id).map(|b| &b.profile)
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    /// Probe every provider, id-sorted. Unhealthy results become startup
    /// degradation reasons.
    pub async fn probe_all(&self) -> Vec<(String, ProbeResult)> {
        let mut results = Vec::new();
        for id in self.list() {
            let binding = &self.bindings[&id];
            let result = binding.adapter.probe().await;
            if !result.healthy() {
                tracing::warn!(provider_id = %id, code = ?result.code, "provider probe unhealthy");
            }
            results.push((id, result));
        }
        results
    }
}
