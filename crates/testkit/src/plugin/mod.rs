//! Instance provisioning plugins.
//!
//! Implements:
//! - Instance specs decoded from templated documents
//! - A registry of named provider factories
//! - The built-in `static/host-pool` provider

mod host_pool;
mod registry;
pub mod template;

pub use host_pool::{HostEntry, HostPoolPlugin};
pub use registry::{ProviderOptions, ProviderRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use testkit_common::TestkitResult;

/// Declarative description of one instance to provision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceSpec {
    /// Provider-specific properties
    #[serde(default)]
    pub properties: serde_json::Value,

    /// Labels attached to the instance
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Boot script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,

    /// Stable logical name, if any
    #[serde(default, rename = "LogicalID", skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<String>,
}

impl InstanceSpec {
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Opaque handle returned by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a provider knows about a live instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub id: InstanceId,
    /// Reachable address, once assigned
    pub address: Option<String>,
    /// Engine port override
    pub port: Option<u16>,
    pub tags: BTreeMap<String, String>,
}

/// A named source of instances
#[async_trait]
pub trait InstancePlugin: Send + Sync + 'static {
    async fn provision(&self, spec: InstanceSpec) -> TestkitResult<InstanceId>;

    async fn describe(&self, id: &InstanceId) -> TestkitResult<InstanceDescription>;

    async fn destroy(&self, id: &InstanceId) -> TestkitResult<()>;
}
