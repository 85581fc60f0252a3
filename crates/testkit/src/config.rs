//! Configuration management for testkit.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use testkit_common::constants::{
    DEFAULT_ENGINE_PORT, DEFAULT_JOIN_RETRY_INTERVAL_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_NAMESPACE,
    DEFAULT_PROVIDER, DEFAULT_VALIDATION_ATTEMPTS, DEFAULT_VALIDATION_INTERVAL_SECS,
};
use testkit_common::{TestkitError, TestkitResult, TlsSettings};

use crate::bootstrap::BootstrapOptions;
use crate::machine::{PlatformTemplates, ValidationPolicy};
use crate::plugin::{HostEntry, InstanceSpec};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where and how machines come from
    pub environment: EnvironmentConfig,

    /// Suite command names, in run order
    pub commands: Vec<String>,

    /// Swarm bootstrap parameters
    pub bootstrap: BootstrapConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// File the configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Test environment definition
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Provider registry key
    pub provider: String,

    /// Scope label for provisioned resources
    pub namespace: String,

    pub engine: EngineConfig,

    /// Host pool for `static/host-pool`
    pub hosts: Vec<HostEntry>,

    pub templates: TemplatesConfig,

    pub validation: ValidationConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            engine: EngineConfig::default(),
            hosts: Vec::new(),
            templates: TemplatesConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Engine API endpoint settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub port: u16,
    pub tls: bool,
    /// Directory holding `ca.pem`, `cert.pem` and `key.pem`
    pub cert_path: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_ENGINE_PORT,
            tls: false,
            cert_path: None,
            request_timeout_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn tls_settings(&self) -> Option<TlsSettings> {
        self.tls.then(|| TlsSettings {
            verify: true,
            cert_path: self.cert_path.clone(),
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Base spec for one platform
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub properties: serde_json::Value,
    pub tags: BTreeMap<String, String>,
    pub init: Option<String>,
}

impl TemplateConfig {
    fn to_spec(&self) -> InstanceSpec {
        InstanceSpec {
            properties: self.properties.clone(),
            tags: self.tags.clone(),
            init: self.init.clone(),
            logical_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub linux: TemplateConfig,
    pub windows: TemplateConfig,
}

impl TemplatesConfig {
    pub fn platform_templates(&self) -> PlatformTemplates {
        PlatformTemplates {
            linux: self.linux.to_spec(),
            windows: self.windows.to_spec(),
        }
    }
}

/// Control channel validation budget
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_VALIDATION_ATTEMPTS,
            interval_secs: DEFAULT_VALIDATION_INTERVAL_SECS,
        }
    }
}

impl ValidationConfig {
    pub fn policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            attempts: self.attempts,
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub listen_addr: String,
    pub advertise_addr: String,
    /// Extra join attempts per worker
    pub join_retries: u32,
    pub join_retry_interval_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            advertise_addr: String::new(),
            join_retries: 0,
            join_retry_interval_secs: DEFAULT_JOIN_RETRY_INTERVAL_SECS,
        }
    }
}

impl BootstrapConfig {
    pub fn options(&self, skip_init: bool) -> BootstrapOptions {
        BootstrapOptions {
            listen_addr: self.listen_addr.clone(),
            advertise_addr: self.advertise_addr.clone(),
            skip_init,
            join_retries: self.join_retries,
            join_retry_interval: Duration::from_secs(self.join_retry_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Command-line values that win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen_addr: Option<String>,
    pub advertise_addr: Option<String>,
    pub join_retries: Option<u32>,
    pub debug: bool,
    pub json_logs: bool,
}

impl AppConfig {
    /// Load configuration from file and `TESTKIT__*` variables, with CLI overrides
    pub fn load(config_path: &str, overrides: &Overrides) -> TestkitResult<Self> {
        let path = Path::new(config_path);
        let found = path.exists();

        let mut builder = config::Config::builder();
        if found {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("TESTKIT").separator("__"))
            .build()
            .map_err(|e| TestkitError::Config(format!("failed to load {config_path}: {e}")))?;

        let mut config: Self = settings
            .try_deserialize()
            .map_err(|e| TestkitError::Config(format!("failed to parse {config_path}: {e}")))?;
        config.source = found.then(|| path.to_path_buf());

        config.apply(overrides);
        Ok(config)
    }

    fn apply(&mut self, overrides: &Overrides) {
        if let Some(ref listen) = overrides.listen_addr {
            self.bootstrap.listen_addr = listen.clone();
        }
        if let Some(ref advertise) = overrides.advertise_addr {
            self.bootstrap.advertise_addr = advertise.clone();
        }
        if let Some(retries) = overrides.join_retries {
            self.bootstrap.join_retries = retries;
        }
        if overrides.debug {
            self.logging.level = "debug".to_string();
        }
        if overrides.json_logs {
            self.logging.json = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use testkit_common::Platform;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load("/nonexistent/testkit.yaml", &Overrides::default()).unwrap();
        assert!(config.source.is_none());
        assert_eq!(config.environment.provider, DEFAULT_PROVIDER);
        assert_eq!(config.environment.engine.port, 2376);
        assert_eq!(config.bootstrap.listen_addr, "0.0.0.0:2377");
        assert_eq!(config.bootstrap.join_retries, 0);
        assert_eq!(config.logging.level, "info");
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_load_yaml_document() {
        let file = write_yaml(
            r#"
environment:
  namespace: ci
  engine:
    port: 2375
    request_timeout_secs: 30
  hosts:
    - name: lnx-a
      address: 10.0.0.1
      platform: linux
    - name: win-a
      address: 10.0.1.1
      platform: windows
      port: 2377
  templates:
    linux:
      properties:
        image: ubuntu
  validation:
    attempts: 2
commands:
  - smoke
  - networking
bootstrap:
  advertise_addr: 10.0.0.1
  join_retries: 2
"#,
        );

        let config = AppConfig::load(file.path().to_str().unwrap(), &Overrides::default()).unwrap();
        assert!(config.source.is_some());
        assert_eq!(config.environment.namespace, "ci");
        assert_eq!(config.environment.engine.port, 2375);
        assert_eq!(config.environment.engine.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.environment.hosts.len(), 2);
        assert_eq!(config.environment.hosts[1].platform, Platform::Windows);
        assert_eq!(config.environment.hosts[1].port, Some(2377));
        assert_eq!(config.environment.validation.attempts, 2);
        assert_eq!(config.environment.validation.interval_secs, 3);
        assert_eq!(config.commands, vec!["smoke", "networking"]);
        assert_eq!(config.bootstrap.join_retries, 2);

        let templates = config.environment.templates.platform_templates();
        assert_eq!(templates.linux.properties["image"], "ubuntu");
        assert!(templates.windows.properties.is_null());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let file = write_yaml("bootstrap: [unterminated");
        let err = AppConfig::load(file.path().to_str().unwrap(), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, TestkitError::Config(_)));
    }

    #[test]
    fn test_cli_overrides_win() {
        let file =
            write_yaml("bootstrap:\n  listen_addr: 0.0.0.0:4000\n  advertise_addr: 10.0.0.9\n");
        let overrides = Overrides {
            listen_addr: Some("0.0.0.0:5000".to_string()),
            join_retries: Some(3),
            debug: true,
            ..Default::default()
        };

        let config = AppConfig::load(file.path().to_str().unwrap(), &overrides).unwrap();
        assert_eq!(config.bootstrap.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.bootstrap.advertise_addr, "10.0.0.9");
        assert_eq!(config.bootstrap.join_retries, 3);
        assert_eq!(config.logging.level, "debug");

        let options = config.bootstrap.options(true);
        assert!(options.skip_init);
        assert_eq!(options.join_retries, 3);
    }

    #[test]
    fn test_engine_tls_settings() {
        let engine = EngineConfig {
            tls: true,
            cert_path: Some("/certs".to_string()),
            ..Default::default()
        };
        let tls = engine.tls_settings().unwrap();
        assert!(tls.verify);
        assert_eq!(tls.cert_path.as_deref(), Some("/certs"));
        assert!(EngineConfig::default().tls_settings().is_none());
    }
}
