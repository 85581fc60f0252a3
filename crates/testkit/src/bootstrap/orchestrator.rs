//! Bootstrap state machine.
//!
//! Ordering rules:
//! - The leader is always Linux machine 0; a Windows node never leads
//! - No join is issued before the leader's init has returned successfully
//! - Workers (remaining Linux, then Windows, in acquisition order) join one
//!   at a time; a failed join is recorded and the next worker still joins
//! - A join is only repeated when `join_retries` is non-zero

use std::time::Duration;

use testkit_common::constants::{DEFAULT_JOIN_RETRY_INTERVAL_SECS, DEFAULT_LISTEN_ADDR};
use testkit_common::{BootstrapState, MachineOutcome, NodeRole, TestkitError, TestkitResult};

use super::result::{BootstrapResult, NodeReport};
use crate::machine::Machine;

/// Bootstrap parameters
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Listen address for init and join
    pub listen_addr: String,
    /// Address the leader advertises (empty lets the engine pick)
    pub advertise_addr: String,
    /// Leave machines untouched
    pub skip_init: bool,
    /// Extra join attempts per worker after a retryable failure (0 = never retry)
    pub join_retries: u32,
    /// Pause between join attempts
    pub join_retry_interval: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            advertise_addr: String::new(),
            skip_init: false,
            join_retries: 0,
            join_retry_interval: Duration::from_secs(DEFAULT_JOIN_RETRY_INTERVAL_SECS),
        }
    }
}

/// One-shot cluster bootstrapper
pub struct Bootstrapper {
    options: BootstrapOptions,
    state: BootstrapState,
}

impl Bootstrapper {
    pub fn new(options: BootstrapOptions) -> Self {
        Self {
            options,
            state: BootstrapState::Unbootstrapped,
        }
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn transition(&mut self, next: BootstrapState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Unexpected bootstrap transition");
        }
        tracing::debug!(from = %self.state, to = %next, "Bootstrap transition");
        self.state = next;
    }

    /// Move to `Failed` and hand the error back for propagation
    fn fail(&mut self, error: TestkitError) -> TestkitError {
        tracing::debug!(error = %error, "Bootstrap failed");
        self.transition(BootstrapState::Failed);
        error
    }

    /// Run the bootstrap over the acquired machines
    pub async fn bootstrap(
        &mut self,
        linux: &[Machine],
        windows: &[Machine],
    ) -> TestkitResult<BootstrapResult> {
        let mut result = BootstrapResult::new();

        if self.options.skip_init {
            tracing::info!(machines = linux.len() + windows.len(), "Skipping swarm init and join");
            for machine in linux.iter().chain(windows) {
                result.push(NodeReport::new(machine, None, MachineOutcome::Skipped));
            }
            self.transition(BootstrapState::Bootstrapped);
            return Ok(result.finish(self.state));
        }

        let Some((leader, linux_workers)) = linux.split_first() else {
            return Err(self.fail(TestkitError::NoLeaderCandidate));
        };

        self.transition(BootstrapState::LeaderInitializing);
        tracing::info!(leader = %leader.name(), "Initializing swarm");

        let init = leader
            .channel()
            .cluster_init(&self.options.listen_addr, &self.options.advertise_addr)
            .await;
        let tokens = match init {
            Ok(tokens) => tokens,
            Err(e) => return Err(self.fail(leader_failure(leader, e))),
        };

        let inspected = self.manager_addr(leader).await;
        let manager_addr = match inspected {
            Ok(addr) => addr,
            Err(e) => return Err(self.fail(leader_failure(leader, e))),
        };

        result.push(NodeReport::new(
            leader,
            Some(NodeRole::Leader),
            MachineOutcome::LeaderReady,
        ));
        self.transition(BootstrapState::LeaderReady);
        tracing::info!(leader = %leader.name(), manager = %manager_addr, "Leader ready");

        // Immutable from here on
        let remote_addrs = vec![manager_addr];
        let worker_token = tokens.worker;

        self.transition(BootstrapState::WorkersJoining);
        for worker in linux_workers.iter().chain(windows) {
            let outcome = match self.join(worker, &remote_addrs, &worker_token).await {
                Ok(()) => MachineOutcome::Joined,
                Err(e) => {
                    let failure = TestkitError::WorkerJoinFailure {
                        machine: worker.name().to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %failure, "Worker left out of cluster");
                    MachineOutcome::Failed(e.to_string())
                }
            };
            result.push(NodeReport::new(worker, Some(NodeRole::Worker), outcome));
        }

        self.transition(BootstrapState::Bootstrapped);
        let result = result.finish(self.state);
        tracing::info!(summary = %result.summary(), "Bootstrap complete");
        Ok(result)
    }

    /// Manager address workers should dial
    async fn manager_addr(&self, leader: &Machine) -> TestkitResult<String> {
        let inspected = leader.channel().cluster_inspect().await;
        match inspected {
            Ok(info) => {
                if let Some(addr) = info.manager_addrs.into_iter().next() {
                    return Ok(addr);
                }
            }
            Err(e) => {
                tracing::warn!(leader = %leader.name(), error = %e, "Leader inspect failed");
                if self.options.advertise_addr.is_empty() {
                    return Err(e);
                }
            }
        }

        if self.options.advertise_addr.is_empty() {
            Err(TestkitError::Engine {
                status: 0,
                message: "leader reports no manager address".to_string(),
            })
        } else {
            Ok(self.options.advertise_addr.clone())
        }
    }

    /// Join one worker, honoring the retry budget
    async fn join(
        &self,
        worker: &Machine,
        remote_addrs: &[String],
        token: &str,
    ) -> TestkitResult<()> {
        let attempts = self.options.join_retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            tracing::debug!(machine = %worker.name(), attempt, "Joining as worker");
            match worker
                .channel()
                .cluster_join(&self.options.listen_addr, remote_addrs, token)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        machine = %worker.name(),
                        platform = %worker.platform(),
                        "Worker joined"
                    );
                    return Ok(());
                }
                Err(e) if attempt < attempts && e.is_retryable() => {
                    tracing::warn!(
                        machine = %worker.name(),
                        attempt,
                        error = %e,
                        "Join failed, retrying"
                    );
                    tokio::time::sleep(self.options.join_retry_interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn leader_failure(leader: &Machine, error: TestkitError) -> TestkitError {
    TestkitError::LeaderInitFailure {
        machine: leader.name().to_string(),
        reason: error.to_string(),
    }
}
