//! Gateway registry: one shared gateway per configuration profile.
//!
//! Built once by the composition root and handed to agents, so every agent
//! asking for the same profile shares one client.

use std::collections::HashMap;
use std::sync::Arc;

use agentloop_config::{AppConfig, DEFAULT_PROFILE};
use agentloop_core::error::ProviderError;
use tracing::debug;

use crate::gateway::LlmGateway;
use crate::retry::RetryPolicy;

/// Routes profile names to gateways.
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<LlmGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    /// Register a gateway under its profile name.
    pub fn register(&mut self, gateway: Arc<LlmGateway>) {
        self.gateways.insert(gateway.profile().to_string(), gateway);
    }

    /// Gateway for `profile`, or the `default` gateway when it is not configured.
    pub fn get(&self, profile: &str) -> Option<Arc<LlmGateway>> {
        match self.gateways.get(profile) {
            Some(gateway) => Some(Arc::clone(gateway)),
            None => {
                debug!(profile = %profile, "Unknown profile, using default gateway");
                self.gateways.get(DEFAULT_PROFILE).cloned()
            }
        }
    }

    /// List all registered profile names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one HTTP-backed gateway per configured profile.
pub fn build_from_config(config: &AppConfig) -> Result<GatewayRegistry, ProviderError> {
    let retry = RetryPolicy::from_settings(&config.retry);
    let mut registry = GatewayRegistry::new();

    for (name, settings) in &config.llm {
        let gateway = LlmGateway::from_settings(name.clone(), settings.clone(), retry.clone())?;
        registry.register(Arc::new(gateway));
    }

    // Always resolvable, even for a hand-built config without [llm]
    if registry.gateways.get(DEFAULT_PROFILE).is_none() {
        let gateway = LlmGateway::from_settings(DEFAULT_PROFILE, config.profile(DEFAULT_PROFILE), retry)?;
        registry.register(Arc::new(gateway));
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_config::LlmSettings;

    #[test]
    fn one_gateway_per_profile() {
        let mut config = AppConfig::default();
        config.llm.insert(
            "vision".into(),
            LlmSettings {
                model: "gpt-4o".into(),
                ..LlmSettings::default()
            },
        );

        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.list(), vec!["default", "vision"]);

        let a = registry.get("vision").unwrap();
        let b = registry.get("vision").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.model(), "gpt-4o");
    }

    #[test]
    fn unknown_profile_falls_back_to_default() {
        let registry = build_from_config(&AppConfig::default()).unwrap();
        let gateway = registry.get("missing").unwrap();
        assert_eq!(gateway.profile(), "default");
    }

    #[test]
    fn empty_config_still_has_default() {
        let mut config = AppConfig::default();
        config.llm.clear();
        let registry = build_from_config(&config).unwrap();
        assert!(registry.get(DEFAULT_PROFILE).is_some());
    }
}
