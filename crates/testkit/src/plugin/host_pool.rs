//! `static/host-pool` provider.
//!
//! Leases pre-existing hosts listed in the environment config instead of
//! creating new ones. `destroy` hands the host back to the pool.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use testkit_common::constants::tags;
use testkit_common::{Platform, TestkitError, TestkitResult};

use super::{InstanceDescription, InstanceId, InstancePlugin, InstanceSpec};

/// A host available for leasing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostEntry {
    /// Host name, unique within the pool
    pub name: String,
    /// Reachable address (IP or DNS name)
    pub address: String,
    pub platform: Platform,
    /// Engine port, if it differs from the environment default
    #[serde(default)]
    pub port: Option<u16>,
}

struct Lease {
    host: HostEntry,
    tags: BTreeMap<String, String>,
}

/// Provider leasing hosts from a fixed pool
pub struct HostPoolPlugin {
    namespace: String,
    hosts: Vec<HostEntry>,
    leases: Mutex<HashMap<InstanceId, Lease>>,
}

impl HostPoolPlugin {
    pub fn new(namespace: String, hosts: Vec<HostEntry>) -> Self {
        Self {
            namespace,
            hosts,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn instance_id(&self, host: &HostEntry) -> InstanceId {
        InstanceId(format!("{}/{}", self.namespace, host.name))
    }

    fn lock(&self) -> TestkitResult<std::sync::MutexGuard<'_, HashMap<InstanceId, Lease>>> {
        self.leases
            .lock()
            .map_err(|_| TestkitError::ProvisionFailure("host pool lock poisoned".to_string()))
    }

    /// Number of hosts currently leased
    #[cfg(test)]
    pub fn leased(&self) -> usize {
        self.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InstancePlugin for HostPoolPlugin {
    async fn provision(&self, spec: InstanceSpec) -> TestkitResult<InstanceId> {
        let platform: Platform = spec
            .tags
            .get(tags::PLATFORM)
            .ok_or_else(|| {
                TestkitError::ProvisionFailure(format!(
                    "spec is missing the {} tag",
                    tags::PLATFORM
                ))
            })?
            .parse()?;

        let mut leases = self.lock()?;
        let host = self
            .hosts
            .iter()
            .find(|h| h.platform == platform && !leases.contains_key(&self.instance_id(h)))
            .ok_or_else(|| {
                TestkitError::ProvisionFailure(format!("host pool has no free {platform} host"))
            })?;

        let id = self.instance_id(host);
        let mut labels = spec.tags;
        labels.insert(tags::SCOPE.to_string(), self.namespace.clone());

        tracing::debug!(instance = %id, address = %host.address, "Leased pool host");
        leases.insert(
            id.clone(),
            Lease {
                host: host.clone(),
                tags: labels,
            },
        );

        Ok(id)
    }

    async fn describe(&self, id: &InstanceId) -> TestkitResult<InstanceDescription> {
        let leases = self.lock()?;
        let lease = leases
            .get(id)
            .ok_or_else(|| TestkitError::ProvisionFailure(format!("unknown instance {id}")))?;

        Ok(InstanceDescription {
            id: id.clone(),
            address: Some(lease.host.address.clone()),
            port: lease.host.port,
            tags: lease.tags.clone(),
        })
    }

    async fn destroy(&self, id: &InstanceId) -> TestkitResult<()> {
        if self.lock()?.remove(id).is_none() {
            tracing::warn!(instance = %id, "Release of unknown instance ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> HostPoolPlugin {
        HostPoolPlugin::new(
            "ci".to_string(),
            vec![
                HostEntry {
                    name: "lin-a".to_string(),
                    address: "10.0.0.1".to_string(),
                    platform: Platform::Linux,
                    port: None,
                },
                HostEntry {
                    name: "win-a".to_string(),
                    address: "10.0.1.1".to_string(),
                    platform: Platform::Windows,
                    port: Some(2375),
                },
            ],
        )
    }

    fn spec(platform: Platform) -> InstanceSpec {
        InstanceSpec::default().with_tag(tags::PLATFORM, platform.as_str())
    }

    #[tokio::test]
    async fn test_lease_and_release() {
        let pool = pool();

        let id = pool.provision(spec(Platform::Windows)).await.unwrap();
        assert_eq!(id.0, "ci/win-a");

        let described = pool.describe(&id).await.unwrap();
        assert_eq!(described.address.as_deref(), Some("10.0.1.1"));
        assert_eq!(described.port, Some(2375));
        assert_eq!(described.tags.get(tags::SCOPE).map(String::as_str), Some("ci"));

        pool.destroy(&id).await.unwrap();
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_pool() {
        let pool = pool();
        pool.provision(spec(Platform::Linux)).await.unwrap();

        let err = pool.provision(spec(Platform::Linux)).await.unwrap_err();
        assert!(matches!(err, TestkitError::ProvisionFailure(_)));
    }

    #[tokio::test]
    async fn test_platform_tag_required() {
        let err = pool().provision(InstanceSpec::default()).await.unwrap_err();
        assert!(matches!(err, TestkitError::ProvisionFailure(_)));
    }
}
