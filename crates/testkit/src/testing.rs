//! Recording fakes for control channel tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use testkit_common::{
    ClusterInfo, ConnectionDescriptor, JoinTokens, MachineId, Platform, TestkitError,
    TestkitResult,
};

use crate::machine::{ControlChannel, Machine};

pub const WORKER_TOKEN: &str = "SWMTKN-1-worker";
pub const MANAGER_TOKEN: &str = "SWMTKN-1-manager";

/// One recorded control channel call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub machine: String,
    pub op: &'static str,
    pub detail: String,
}

/// Shared, ordered log of calls across all fake channels
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn record(&self, machine: &str, op: &'static str, detail: impl Into<String>) {
        self.0.lock().unwrap().push(Call {
            machine: machine.to_string(),
            op,
            detail: detail.into(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn count_for(&self, machine: &str, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.machine == machine && c.op == op)
            .count()
    }

    /// `machine:op` pairs in call order
    pub fn sequence(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{}:{}", c.machine, c.op))
            .collect()
    }
}

/// Scriptable [`ControlChannel`] that records every call
pub struct FakeChannel {
    name: String,
    log: CallLog,
    ping_error: Option<TestkitError>,
    init_error: Option<TestkitError>,
    inspect_error: Option<TestkitError>,
    join_error: Option<TestkitError>,
    /// Errors returned by the next join attempts before `join_error` applies
    join_script: Mutex<VecDeque<TestkitError>>,
    manager_addrs: Vec<String>,
}

impl FakeChannel {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            ping_error: None,
            init_error: None,
            inspect_error: None,
            join_error: None,
            join_script: Mutex::new(VecDeque::new()),
            manager_addrs: vec![format!("{name}:2377")],
        }
    }

    pub fn failing_ping(mut self) -> Self {
        let error = TestkitError::Transport(format!("{}: connection refused", self.name));
        self.ping_error = Some(error);
        self
    }

    pub fn failing_init(mut self, error: TestkitError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn failing_inspect(mut self, error: TestkitError) -> Self {
        self.inspect_error = Some(error);
        self
    }

    pub fn failing_join(mut self, error: TestkitError) -> Self {
        self.join_error = Some(error);
        self
    }

    /// Fail the first `times` joins with `error`, then succeed
    pub fn flaky_join(self, times: usize, error: TestkitError) -> Self {
        self.join_script
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(error, times));
        self
    }

    pub fn with_manager_addrs(mut self, addrs: Vec<String>) -> Self {
        self.manager_addrs = addrs;
        self
    }

    pub fn into_machine(self, platform: Platform) -> Machine {
        let name = self.name.clone();
        Machine::new(
            MachineId::new(format!("id-{name}")),
            name.clone(),
            platform,
            Some(ConnectionDescriptor::new(name, "127.0.0.1", 2376)),
            Arc::new(self),
        )
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    async fn ping(&self) -> TestkitResult<()> {
        self.log.record(&self.name, "ping", "");
        match &self.ping_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn cluster_init(
        &self,
        listen_addr: &str,
        advertise_addr: &str,
    ) -> TestkitResult<JoinTokens> {
        self.log
            .record(&self.name, "init", format!("{listen_addr}|{advertise_addr}"));
        match &self.init_error {
            Some(e) => Err(e.clone()),
            None => Ok(JoinTokens {
                worker: WORKER_TOKEN.to_string(),
                manager: MANAGER_TOKEN.to_string(),
            }),
        }
    }

    async fn cluster_join(
        &self,
        listen_addr: &str,
        remote_addrs: &[String],
        join_token: &str,
    ) -> TestkitResult<()> {
        self.log.record(
            &self.name,
            "join",
            format!("{listen_addr}|{}|{join_token}", remote_addrs.join(",")),
        );
        if let Some(e) = self.join_script.lock().unwrap().pop_front() {
            return Err(e);
        }
        match &self.join_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn cluster_inspect(&self) -> TestkitResult<ClusterInfo> {
        self.log.record(&self.name, "inspect", "");
        if let Some(e) = &self.inspect_error {
            return Err(e.clone());
        }
        Ok(ClusterInfo {
            cluster_id: "cluster-1".to_string(),
            node_id: format!("node-{}", self.name),
            join_tokens: JoinTokens {
                worker: WORKER_TOKEN.to_string(),
                manager: MANAGER_TOKEN.to_string(),
            },
            manager_addrs: self.manager_addrs.clone(),
        })
    }
}

/// Log sink for a test-local `tracing` subscriber
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Subscriber writing every event at `max_level` and above into this capture
    pub fn subscriber(
        &self,
        level: tracing::Level,
    ) -> impl tracing::Subscriber + Send + Sync + use<> {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
