//! Aggregate bootstrap outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;

use testkit_common::{BootstrapState, MachineId, MachineOutcome, NodeRole, Platform, TestkitError};

use crate::machine::Machine;

/// Outcome for one machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub id: MachineId,
    pub name: String,
    pub platform: Platform,
    /// None when bootstrap was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
    #[serde(flatten)]
    pub outcome: MachineOutcome,
}

impl NodeReport {
    pub fn new(machine: &Machine, role: Option<NodeRole>, outcome: MachineOutcome) -> Self {
        Self {
            id: machine.id().clone(),
            name: machine.name().to_string(),
            platform: machine.platform(),
            role,
            outcome,
        }
    }
}

/// Per-machine outcomes plus the final state, leader first
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapResult {
    pub state: BootstrapState,
    pub nodes: Vec<NodeReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BootstrapResult {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            state: BootstrapState::Unbootstrapped,
            nodes: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn push(&mut self, report: NodeReport) {
        self.nodes.push(report);
    }

    pub(crate) fn finish(mut self, state: BootstrapState) -> Self {
        self.state = state;
        self.finished_at = Utc::now();
        self
    }

    pub fn leader(&self) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.role == Some(NodeRole::Leader))
    }

    #[cfg(test)]
    pub fn outcome(&self, id: &MachineId) -> Option<&MachineOutcome> {
        self.nodes.iter().find(|n| &n.id == id).map(|n| &n.outcome)
    }

    pub fn joined_count(&self) -> usize {
        self.count(|o| matches!(o, MachineOutcome::Joined))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, MachineOutcome::Skipped))
    }

    pub fn failed(&self) -> Vec<&NodeReport> {
        self.nodes.iter().filter(|n| n.outcome.is_failed()).collect()
    }

    /// Worker failures as errors, for reporting
    pub fn failures(&self) -> Vec<TestkitError> {
        self.failed()
            .into_iter()
            .map(|n| TestkitError::WorkerJoinFailure {
                machine: n.name.clone(),
                reason: match &n.outcome {
                    MachineOutcome::Failed(cause) => cause.clone(),
                    other => other.to_string(),
                },
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&MachineOutcome) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.outcome)).count()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let leader = self.leader().map(|n| n.name.as_str()).unwrap_or("none");
        format!(
            "{}: leader={} joined={} failed={} skipped={} ({} ms)",
            self.state,
            leader,
            self.joined_count(),
            self.failed().len(),
            self.skipped_count(),
            (self.finished_at - self.started_at).num_milliseconds()
        )
    }
}
