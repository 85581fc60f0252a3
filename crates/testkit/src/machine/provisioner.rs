//! Machine acquisition.
//!
//! [`FleetProvisioner`] asks an [`InstancePlugin`] for instances, connects
//! a control channel to each and validates it before handing machines out.
//! The visible result is all-or-nothing: on any failure every instance
//! acquired so far is destroyed before the error is returned.

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use testkit_common::constants::{
    tags, DEFAULT_ENGINE_PORT, DEFAULT_VALIDATION_ATTEMPTS, DEFAULT_VALIDATION_INTERVAL_SECS,
};
use testkit_common::{
    ConnectionDescriptor, MachineId, Platform, TestkitError, TestkitResult, TlsSettings,
};

use super::{ChannelConnector, ControlChannel, Machine};
use crate::plugin::{InstanceId, InstancePlugin, InstanceSpec};

/// Source of ready-to-use machines
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Acquire exactly `linux` Linux and `windows` Windows machines
    async fn acquire(&self, linux: usize, windows: usize)
    -> TestkitResult<(Vec<Machine>, Vec<Machine>)>;
}

/// Per-platform base specs
#[derive(Debug, Clone, Default)]
pub struct PlatformTemplates {
    pub linux: InstanceSpec,
    pub windows: InstanceSpec,
}

impl PlatformTemplates {
    fn for_platform(&self, platform: Platform) -> &InstanceSpec {
        match platform {
            Platform::Linux => &self.linux,
            Platform::Windows => &self.windows,
        }
    }
}

/// Bounded control channel validation budget
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_VALIDATION_ATTEMPTS,
            interval: Duration::from_secs(DEFAULT_VALIDATION_INTERVAL_SECS),
        }
    }
}

/// Provisioner backed by an instance plugin
pub struct FleetProvisioner {
    plugin: Arc<dyn InstancePlugin>,
    connector: Arc<dyn ChannelConnector>,
    templates: PlatformTemplates,
    validation: ValidationPolicy,
    namespace: String,
    engine_port: u16,
    tls: Option<TlsSettings>,
}

/// One requested slot
#[derive(Debug, Clone, Copy)]
struct Slot {
    platform: Platform,
    index: usize,
}

impl FleetProvisioner {
    pub fn new(
        plugin: Arc<dyn InstancePlugin>,
        connector: Arc<dyn ChannelConnector>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            plugin,
            connector,
            templates: PlatformTemplates::default(),
            validation: ValidationPolicy::default(),
            namespace: namespace.into(),
            engine_port: DEFAULT_ENGINE_PORT,
            tls: None,
        }
    }

    pub fn with_templates(mut self, templates: PlatformTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_validation(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_engine(mut self, port: u16, tls: Option<TlsSettings>) -> Self {
        self.engine_port = port;
        self.tls = tls;
        self
    }

    fn machine_name(&self, slot: Slot) -> String {
        format!("{}-{}-{}", self.namespace, slot.platform, slot.index)
    }

    fn spec_for(&self, slot: Slot) -> InstanceSpec {
        let mut spec = self
            .templates
            .for_platform(slot.platform)
            .clone()
            .with_tag(tags::SCOPE, self.namespace.clone())
            .with_tag(tags::PLATFORM, slot.platform.as_str())
            .with_tag(tags::INDEX, slot.index.to_string());
        if spec.logical_id.is_none() {
            spec.logical_id = Some(self.machine_name(slot));
        }
        spec
    }

    /// Describe, connect and validate one provisioned instance
    async fn ready(&self, slot: Slot, id: &InstanceId) -> TestkitResult<Machine> {
        let name = self.machine_name(slot);
        let description = self.plugin.describe(id).await?;
        let address = description.address.ok_or_else(|| {
            TestkitError::ProvisionFailure(format!("{name} ({id}) has no reachable address"))
        })?;

        let mut descriptor =
            ConnectionDescriptor::new(&name, address, description.port.unwrap_or(self.engine_port));
        if let Some(tls) = &self.tls {
            descriptor = descriptor.with_tls(tls.clone());
        }

        let channel = self.connector.connect(&descriptor)?;
        self.validate(&name, channel.as_ref()).await?;

        Ok(Machine::new(
            MachineId::new(id.0.clone()),
            name,
            slot.platform,
            Some(descriptor),
            channel,
        ))
    }

    /// Ping until the channel answers or the attempt budget runs out
    async fn validate(&self, name: &str, channel: &dyn ControlChannel) -> TestkitResult<()> {
        let attempts = self.validation.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match channel.ping().await {
                Ok(()) => {
                    tracing::debug!(machine = %name, attempt, "Control channel validated");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(
                        machine = %name,
                        attempt,
                        error = %e,
                        "Control channel not ready"
                    );
                    last_error = Some(e);
                }
            }

            if attempt < attempts && !self.validation.interval.is_zero() {
                let max_jitter = self.validation.interval.as_millis() as u64 / 10;
                let jitter = rand::rng().random_range(0..=max_jitter);
                tokio::time::sleep(self.validation.interval + Duration::from_millis(jitter)).await;
            }
        }

        Err(TestkitError::ProvisionFailure(format!(
            "{name}: control channel not reachable after {attempts} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Destroy every instance in `ids`, logging failures
    async fn release(&self, ids: &[InstanceId]) {
        let results = join_all(ids.iter().map(|id| self.plugin.destroy(id))).await;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => tracing::debug!(instance = %id, "Released instance"),
                Err(e) => tracing::warn!(instance = %id, error = %e, "Failed to release instance"),
            }
        }
    }
}

#[async_trait]
impl Provisioner for FleetProvisioner {
    async fn acquire(
        &self,
        linux: usize,
        windows: usize,
    ) -> TestkitResult<(Vec<Machine>, Vec<Machine>)> {
        let slots: Vec<Slot> = (0..linux)
            .map(|index| Slot {
                platform: Platform::Linux,
                index,
            })
            .chain((0..windows).map(|index| Slot {
                platform: Platform::Windows,
                index,
            }))
            .collect();

        tracing::info!(linux, windows, namespace = %self.namespace, "Acquiring machines");

        // Provision concurrently; order of results follows `slots`
        let provisioned =
            join_all(slots.iter().map(|slot| self.plugin.provision(self.spec_for(*slot)))).await;

        let mut acquired = Vec::with_capacity(slots.len());
        let mut first_error = None;
        for (slot, result) in slots.iter().zip(provisioned) {
            match result {
                Ok(id) => acquired.push((*slot, id)),
                Err(e) => {
                    tracing::warn!(
                        platform = %slot.platform,
                        index = slot.index,
                        error = %e,
                        "Provision failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        let ids: Vec<InstanceId> = acquired.iter().map(|(_, id)| id.clone()).collect();
        if let Some(e) = first_error {
            self.release(&ids).await;
            return Err(as_provision_failure(e));
        }

        let readied = join_all(acquired.iter().map(|(slot, id)| self.ready(*slot, id))).await;

        let mut linux_machines = Vec::with_capacity(linux);
        let mut windows_machines = Vec::with_capacity(windows);
        for result in readied {
            match result {
                Ok(machine) => match machine.platform() {
                    Platform::Linux => linux_machines.push(machine),
                    Platform::Windows => windows_machines.push(machine),
                },
                Err(e) => {
                    self.release(&ids).await;
                    return Err(as_provision_failure(e));
                }
            }
        }

        tracing::info!(
            linux = linux_machines.len(),
            windows = windows_machines.len(),
            "Machines acquired and validated"
        );
        Ok((linux_machines, windows_machines))
    }
}

fn as_provision_failure(error: TestkitError) -> TestkitError {
    match error {
        e @ TestkitError::ProvisionFailure(_) => e,
        other => TestkitError::ProvisionFailure(other.to_string()),
    }
}
