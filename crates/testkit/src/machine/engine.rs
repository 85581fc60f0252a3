//! Container engine HTTP API client.
//!
//! Speaks the engine's remote API over TCP to drive swarm operations:
//! - `GET /_ping` for liveness
//! - `POST /swarm/init`, `POST /swarm/join` for membership
//! - `GET /swarm` and `GET /info` for tokens and manager addresses
//!
//! With TLS the descriptor's cert path holds `ca.pem`, `cert.pem` and
//! `key.pem` (PKCS#1, PKCS#8 or SEC1).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use testkit_common::{ClusterInfo, ConnectionDescriptor, JoinTokens, TestkitError, TestkitResult};

use super::{ChannelConnector, ControlChannel};

/// TCP connect timeout for engine requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine API client bound to one host
pub struct EngineClient {
    client: reqwest::Client,
    base_url: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmInitRequest<'a> {
    listen_addr: &'a str,
    advertise_addr: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmJoinRequest<'a> {
    listen_addr: &'a str,
    remote_addrs: &'a [String],
    join_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmResponse {
    #[serde(rename = "ID")]
    id: String,
    join_tokens: JoinTokensBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JoinTokensBody {
    worker: String,
    manager: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InfoResponse {
    swarm: SwarmInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmInfo {
    #[serde(rename = "NodeID", default)]
    node_id: String,
    #[serde(default)]
    remote_managers: Option<Vec<RemoteManager>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteManager {
    addr: String,
}

#[derive(Deserialize)]
struct EngineMessage {
    message: String,
}

impl EngineClient {
    /// Create a client for the host described by `descriptor`
    pub fn new(
        descriptor: &ConnectionDescriptor,
        request_timeout: Option<Duration>,
    ) -> TestkitResult<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(tls) = &descriptor.tls {
            if let Some(cert_path) = &tls.cert_path {
                let dir = Path::new(cert_path);
                let ca = read_pem(&dir.join("ca.pem"))?;
                let mut identity_pem = read_pem(&dir.join("cert.pem"))?;
                identity_pem.push(b'\n');
                identity_pem.extend(read_pem(&dir.join("key.pem"))?);

                let root = reqwest::Certificate::from_pem(&ca)
                    .map_err(|e| TestkitError::Config(format!("invalid ca.pem: {e}")))?;
                let identity = reqwest::Identity::from_pem(&identity_pem)
                    .map_err(|e| TestkitError::Config(format!("invalid client identity: {e}")))?;
                builder = builder.add_root_certificate(root).identity(identity);
            }
            if !tls.verify {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TestkitError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: descriptor.engine_url(),
            name: descriptor.name.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, e: reqwest::Error) -> TestkitError {
        if e.is_timeout() {
            TestkitError::Timeout(format!("{}: {}", self.name, e))
        } else {
            TestkitError::Transport(format!("{}: {}", self.name, e))
        }
    }

    /// Turn a non-success response into an engine error
    async fn check(response: reqwest::Response) -> TestkitResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<EngineMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body);

        Err(TestkitError::Engine {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> TestkitResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        Self::check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> TestkitResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ControlChannel for EngineClient {
    async fn ping(&self) -> TestkitResult<()> {
        let response = self
            .client
            .get(self.url("/_ping"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn cluster_init(
        &self,
        listen_addr: &str,
        advertise_addr: &str,
    ) -> TestkitResult<JoinTokens> {
        tracing::debug!(machine = %self.name, listen_addr, advertise_addr, "POST /swarm/init");
        self.post_json(
            "/swarm/init",
            &SwarmInitRequest {
                listen_addr,
                advertise_addr,
            },
        )
        .await?;

        let swarm: SwarmResponse = self.get_json("/swarm").await?;
        Ok(JoinTokens {
            worker: swarm.join_tokens.worker,
            manager: swarm.join_tokens.manager,
        })
    }

    async fn cluster_join(
        &self,
        listen_addr: &str,
        remote_addrs: &[String],
        join_token: &str,
    ) -> TestkitResult<()> {
        tracing::debug!(machine = %self.name, remote = ?remote_addrs, "POST /swarm/join");
        self.post_json(
            "/swarm/join",
            &SwarmJoinRequest {
                listen_addr,
                remote_addrs,
                join_token,
            },
        )
        .await
    }

    async fn cluster_inspect(&self) -> TestkitResult<ClusterInfo> {
        let swarm: SwarmResponse = self.get_json("/swarm").await?;
        let info: InfoResponse = self.get_json("/info").await?;

        let manager_addrs = info
            .swarm
            .remote_managers
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.addr)
            .collect();

        Ok(ClusterInfo {
            cluster_id: swarm.id,
            node_id: info.swarm.node_id,
            join_tokens: JoinTokens {
                worker: swarm.join_tokens.worker,
                manager: swarm.join_tokens.manager,
            },
            manager_addrs,
        })
    }
}

/// Connects engine clients to provisioned hosts
#[derive(Debug, Clone, Default)]
pub struct EngineConnector {
    request_timeout: Option<Duration>,
}

impl EngineConnector {
    pub fn new(request_timeout: Option<Duration>) -> Self {
        Self { request_timeout }
    }
}

impl ChannelConnector for EngineConnector {
    fn connect(&self, descriptor: &ConnectionDescriptor) -> TestkitResult<Arc<dyn ControlChannel>> {
        Ok(Arc::new(EngineClient::new(descriptor, self.request_timeout)?))
    }
}

fn read_pem(path: &Path) -> TestkitResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| TestkitError::Config(format!("failed to read {}: {e}", path.display())))
}
