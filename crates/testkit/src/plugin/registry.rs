//! Provider registry: string key → plugin factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use testkit_common::constants::{DEFAULT_NAMESPACE, DEFAULT_PROVIDER};
use testkit_common::{TestkitError, TestkitResult};

use super::{HostEntry, HostPoolPlugin, InstancePlugin};

/// Inputs handed to a provider factory
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Scoping label for provisioned resources
    pub namespace: String,
    /// Pre-existing hosts (used by `static/host-pool`)
    pub hosts: Vec<HostEntry>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            hosts: Vec::new(),
        }
    }
}

/// Builds a plugin instance from options
pub type ProviderFactory =
    Box<dyn Fn(&ProviderOptions) -> TestkitResult<Arc<dyn InstancePlugin>> + Send + Sync>;

/// Explicit table of named providers
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_PROVIDER, |options: &ProviderOptions| {
            let plugin: Arc<dyn InstancePlugin> = Arc::new(HostPoolPlugin::new(
                options.namespace.clone(),
                options.hosts.clone(),
            ));
            Ok(plugin)
        });
        registry
    }

    /// Register a factory under `key`, replacing any previous one
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderOptions) -> TestkitResult<Arc<dyn InstancePlugin>> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.factories.insert(key.clone(), Box::new(factory)).is_some() {
            tracing::warn!(provider = %key, "Provider re-registered");
        }
    }

    /// Build the plugin registered under exactly `key`
    pub fn lookup(
        &self,
        key: &str,
        options: &ProviderOptions,
    ) -> TestkitResult<Arc<dyn InstancePlugin>> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| TestkitError::UnknownProvider(key.to_string()))?;
        factory(options)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
