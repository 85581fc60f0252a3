//! Application state and shared resources.

use std::sync::Arc;

use testkit_common::TestkitResult;

use crate::bootstrap::BootstrapOptions;
use crate::config::AppConfig;
use crate::machine::{ChannelConnector, EngineConnector, FleetProvisioner};
use crate::plugin::{InstancePlugin, ProviderOptions, ProviderRegistry};

/// Everything a command needs, built once in `main`
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Provider factories by key
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, registry: ProviderRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    /// Options handed to a provider factory
    pub fn provider_options(&self, namespace: &str) -> ProviderOptions {
        ProviderOptions {
            namespace: namespace.to_string(),
            hosts: self.config.environment.hosts.clone(),
        }
    }

    /// Instantiate the provider registered under `key`
    pub fn plugin(&self, key: &str, namespace: &str) -> TestkitResult<Arc<dyn InstancePlugin>> {
        self.registry.lookup(key, &self.provider_options(namespace))
    }

    /// Fleet provisioner for the configured environment
    pub fn provisioner(&self) -> TestkitResult<FleetProvisioner> {
        let connector = EngineConnector::new(self.config.environment.engine.request_timeout());
        self.provisioner_with(Arc::new(connector))
    }

    pub(crate) fn provisioner_with(
        &self,
        connector: Arc<dyn ChannelConnector>,
    ) -> TestkitResult<FleetProvisioner> {
        let env = &self.config.environment;
        let plugin = self.plugin(&env.provider, &env.namespace)?;

        Ok(FleetProvisioner::new(plugin, connector, env.namespace.clone())
            .with_templates(env.templates.platform_templates())
            .with_validation(env.validation.policy())
            .with_engine(env.engine.port, env.engine.tls_settings()))
    }

    pub fn bootstrap_options(&self, skip_init: bool) -> BootstrapOptions {
        self.config.bootstrap.options(skip_init)
    }
}
