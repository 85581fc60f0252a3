//! Core types shared across testkit components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::env;
use crate::error::TestkitError;

/// Host operating system of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = TestkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            other => Err(TestkitError::InputValidationError(format!(
                "unknown platform '{other}' (expected linux or windows)"
            ))),
        }
    }
}

/// Opaque machine identity (the backing resource ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// TLS material for reaching a host's engine endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Verify the server certificate
    pub verify: bool,

    /// Directory holding ca.pem, cert.pem and key.pem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
}

/// Everything needed to address one host directly, independent of cluster state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Machine name the descriptor belongs to
    pub name: String,

    /// Reachable host name or IP (empty for placeholders)
    pub host: String,

    /// Engine API port
    pub port: u16,

    /// TLS settings, if the endpoint is secured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

impl ConnectionDescriptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            tls: None,
        }
    }

    /// Descriptor for a machine that has no reachable address
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::new(name, "", 0)
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.host.is_empty()
    }

    /// `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine client address (`tcp://host:port`)
    pub fn docker_host(&self) -> String {
        format!("tcp://{}", self.address())
    }

    /// Base URL for the engine HTTP API
    pub fn engine_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{}://{}", scheme, self.address())
    }

    /// Environment variables a client needs to talk to this host
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        if self.is_placeholder() {
            return Vec::new();
        }

        let mut vars = vec![(env::DOCKER_HOST, self.docker_host())];
        if let Some(tls) = &self.tls {
            if tls.verify {
                vars.push((env::DOCKER_TLS_VERIFY, "1".to_string()));
            }
            if let Some(path) = &tls.cert_path {
                vars.push((env::DOCKER_CERT_PATH, path.clone()));
            }
        }
        vars
    }
}

/// Join secrets issued by the cluster leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTokens {
    pub worker: String,
    pub manager: String,
}

/// Cluster view reported by a single host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster identifier
    pub cluster_id: String,

    /// This host's node ID within the cluster
    pub node_id: String,

    /// Join tokens (only visible on managers)
    pub join_tokens: JoinTokens,

    /// Reachable manager addresses (`host:port`)
    pub manager_addrs: Vec<String>,
}

/// Role a machine takes in the bootstrapped cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Worker,
}

/// Per-machine bootstrap outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "cause", rename_all = "kebab-case")]
pub enum MachineOutcome {
    /// Cluster initialized on this machine
    LeaderReady,
    /// Joined as worker
    Joined,
    /// Join attempted and failed
    Failed(String),
    /// Bootstrap was skipped
    Skipped,
}

impl MachineOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for MachineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LeaderReady => f.write_str("leader-ready"),
            Self::Joined => f.write_str("joined"),
            Self::Failed(cause) => write!(f, "failed: {cause}"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Bootstrap state machine
///
/// ```text
/// Unbootstrapped → LeaderInitializing → LeaderReady → WorkersJoining → Bootstrapped
///        └──────────────┴──────────────────┴──────────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapState {
    #[default]
    Unbootstrapped,
    LeaderInitializing,
    LeaderReady,
    WorkersJoining,
    Bootstrapped,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bootstrapped | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: BootstrapState) -> bool {
        use BootstrapState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            // skip-init goes straight to the end
            (Unbootstrapped, LeaderInitializing | Bootstrapped) => true,
            (LeaderInitializing, LeaderReady) => true,
            (LeaderReady, WorkersJoining) => true,
            (WorkersJoining, Bootstrapped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unbootstrapped => "unbootstrapped",
            Self::LeaderInitializing => "leader-initializing",
            Self::LeaderReady => "leader-ready",
            Self::WorkersJoining => "workers-joining",
            Self::Bootstrapped => "bootstrapped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
