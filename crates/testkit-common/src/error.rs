//! Error taxonomy for provisioning and cluster bootstrap.

use thiserror::Error;

/// Result alias used across testkit components
pub type TestkitResult<T> = std::result::Result<T, TestkitError>;

/// Errors raised while provisioning machines and bootstrapping a cluster
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestkitError {
    /// The fleet could not supply or validate the requested machines
    #[error("Provision failure: {0}")]
    ProvisionFailure(String),

    /// No Linux machine available to lead the cluster
    #[error("No leader candidate: at least one Linux machine is required")]
    NoLeaderCandidate,

    /// Cluster init on the leader failed
    #[error("Leader init failure on {machine}: {reason}")]
    LeaderInitFailure { machine: String, reason: String },

    /// A single worker failed to join (recorded, never fatal)
    #[error("Worker join failure on {machine}: {reason}")]
    WorkerJoinFailure { machine: String, reason: String },

    /// No provider registered under this key
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Instance template could not be rendered or decoded
    #[error("Template decode error: {0}")]
    TemplateDecodeError(String),

    /// Invalid user input (counts, parameters)
    #[error("Invalid input: {0}")]
    InputValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control channel call did not complete in time
    #[error("TimeoutError: {0}")]
    Timeout(String),

    /// Engine answered with a non-success status
    #[error("Engine error ({status}): {message}")]
    Engine { status: u16, message: String },

    /// Engine could not be reached
    #[error("Transport error: {0}")]
    Transport(String),
}

impl TestkitError {
    /// Returns true if this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::WorkerJoinFailure { .. })
    }

    /// Returns true if the failed call may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Short class name, logged alongside worker failures
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProvisionFailure(_) => "ProvisionFailure",
            Self::NoLeaderCandidate => "NoLeaderCandidate",
            Self::LeaderInitFailure { .. } => "LeaderInitFailure",
            Self::WorkerJoinFailure { .. } => "WorkerJoinFailure",
            Self::UnknownProvider(_) => "UnknownProvider",
            Self::TemplateDecodeError(_) => "TemplateDecodeError",
            Self::InputValidationError(_) => "InputValidationError",
            Self::Config(_) => "ConfigError",
            Self::Timeout(_) => "TimeoutError",
            Self::Engine { .. } => "EngineError",
            Self::Transport(_) => "TransportError",
        }
    }
}
