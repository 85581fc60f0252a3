//! Provisioned hosts and their control channels.
//!
//! A [`Machine`] is a handle to one host: identity, platform, how to reach
//! it directly, and a [`ControlChannel`] for cluster-control operations.

mod engine;
mod provisioner;

pub use engine::EngineConnector;
pub use provisioner::{FleetProvisioner, PlatformTemplates, Provisioner, ValidationPolicy};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use testkit_common::{
    ClusterInfo, ConnectionDescriptor, JoinTokens, MachineId, Platform, TestkitResult,
};

/// Cluster-control operations against a single host
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    /// Liveness probe
    async fn ping(&self) -> TestkitResult<()>;

    /// Initialize a new cluster with this host as its first manager
    async fn cluster_init(&self, listen_addr: &str, advertise_addr: &str)
    -> TestkitResult<JoinTokens>;

    /// Join an existing cluster through one of `remote_addrs`
    async fn cluster_join(
        &self,
        listen_addr: &str,
        remote_addrs: &[String],
        join_token: &str,
    ) -> TestkitResult<()>;

    /// Read the cluster view from this host
    async fn cluster_inspect(&self) -> TestkitResult<ClusterInfo>;
}

/// Builds a control channel for a reachable host
pub trait ChannelConnector: Send + Sync + 'static {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> TestkitResult<Arc<dyn ControlChannel>>;
}

/// One provisioned host
#[derive(Clone)]
pub struct Machine {
    id: MachineId,
    name: String,
    platform: Platform,
    descriptor: Option<ConnectionDescriptor>,
    channel: Arc<dyn ControlChannel>,
}

impl Machine {
    pub fn new(
        id: MachineId,
        name: impl Into<String>,
        platform: Platform,
        descriptor: Option<ConnectionDescriptor>,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            platform,
            descriptor,
            channel,
        }
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Direct connection info, if the host is addressable
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn channel(&self) -> &dyn ControlChannel {
        self.channel.as_ref()
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
