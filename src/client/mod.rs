pub mod tls;
pub mod wire;

use anyhow::Context;
use log::{debug, warn};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::config::Config;
use crate::types::{
    ChanStatusAction, Channel, ChannelEdge, ChannelPoint, FailedUpdate, LocalIdentity,
    PolicyUpdate, RemoteNodeInfo,
};

/// Trait abstracting the node-control API surface used by the warden loops.
///
/// This enables mock-based testing without a live node.
#[async_trait::async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_local_identity(&self) -> anyhow::Result<LocalIdentity>;
    /// All public channels, active or not.
    async fn list_channels(&self) -> anyhow::Result<Vec<Channel>>;
    async fn get_channel_edge(&self, chan_id: u64) -> anyhow::Result<ChannelEdge>;
    async fn update_channel_policy(
        &self,
        update: &PolicyUpdate,
    ) -> anyhow::Result<Vec<FailedUpdate>>;
    async fn set_channel_status(
        &self,
        chan_point: &ChannelPoint,
        action: ChanStatusAction,
    ) -> anyhow::Result<()>;
    async fn get_node_info(&self, pubkey: &str) -> anyhow::Result<RemoteNodeInfo>;
    async fn disconnect_peer(&self, pubkey: &str) -> anyhow::Result<()>;
    async fn connect_peer(&self, pubkey: &str, host: &str, timeout_secs: u64)
        -> anyhow::Result<()>;
}

/// Non-2xx answer from the node, with the message from its error body.
#[derive(Debug, thiserror::Error)]
#[error("{call}: node returned {status}: {message}")]
pub struct NodeApiError {
    pub call: String,
    pub status: StatusCode,
    pub message: String,
}

/// Rate-limited, retrying client for LND's REST gateway.
pub struct LndRestClient {
    http: reqwest::Client,
    base_url: String,
    macaroon_hex: String,
    request_timeout: Duration,
    lookup_timeout: Duration,
    retry_base: Duration,
    /// Semaphore for rate limiting (1 concurrent request)
    rate_limiter: Arc<Semaphore>,
}

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 1000;
const RATE_LIMIT_DELAY_MS: u64 = 100;
const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

impl LndRestClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let cert_pem = std::fs::read(&config.server.tls_cert_path).with_context(|| {
            format!(
                "Failed to read TLS cert at {}",
                config.server.tls_cert_path.display()
            )
        })?;
        let tls = tls::pinned_client_config(&cert_pem)?;

        let macaroon_path = config.server.effective_macaroon_path();
        let macaroon = std::fs::read(&macaroon_path)
            .with_context(|| format!("Failed to read macaroon at {}", macaroon_path.display()))?;

        let http = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(config.general.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.server.rest_url.trim_end_matches('/').to_string(),
            macaroon_hex: hex::encode(macaroon),
            request_timeout: config.general.request_timeout(),
            lookup_timeout: config.general.lookup_timeout(),
            retry_base: Duration::from_millis(RETRY_BASE_MS),
            rate_limiter: Arc::new(Semaphore::new(1)),
        })
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .timeout(timeout)
    }

    async fn send<T: DeserializeOwned>(&self, name: &str, req: RequestBuilder) -> anyhow::Result<T> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("Rate limiter semaphore closed"))?;
        sleep(Duration::from_millis(RATE_LIMIT_DELAY_MS)).await;

        let resp = req
            .send()
            .await
            .with_context(|| format!("{}: request failed", name))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<wire::ErrorBody>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(NodeApiError {
                call: name.to_string(),
                status,
                message,
            }
            .into());
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("{}: malformed response", name))
    }

    /// Retry wrapper for read-only calls. Only transient failures are retried.
    async fn with_retry<F, Fut, T>(&self, name: &str, f: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(resp) => {
                    debug!("{}: success", name);
                    return Ok(resp);
                }
                Err(e) if attempt + 1 < MAX_RETRIES && is_transient(&e) => {
                    let delay = self.retry_base * 2u32.pow(attempt);
                    warn!(
                        "{}: attempt {} failed ({:#}), retrying in {}ms",
                        name,
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if is_transient(&e) => {
                    return Err(e.context(format!("{}: all {} attempts failed", name, MAX_RETRIES)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Transport failures and 5xx answers may go away on their own; anything
/// else (4xx, undecodable body) will fail the same way again.
fn is_transient(e: &anyhow::Error) -> bool {
    if let Some(api) = e.downcast_ref::<NodeApiError>() {
        return api.status.is_server_error();
    }
    e.downcast_ref::<reqwest::Error>()
        .map_or(false, |re| !re.is_decode() && !re.is_builder())
}

#[async_trait::async_trait]
impl NodeClient for LndRestClient {
    async fn get_local_identity(&self) -> anyhow::Result<LocalIdentity> {
        self.with_retry("GetInfo", || async move {
            let req = self.request(Method::GET, "/v1/getinfo", self.lookup_timeout);
            let resp: wire::GetInfoResponse = self.send("GetInfo", req).await?;
            Ok::<_, anyhow::Error>(LocalIdentity::from(resp))
        })
        .await
    }

    async fn list_channels(&self) -> anyhow::Result<Vec<Channel>> {
        self.with_retry("ListChannels", || async move {
            let req = self
                .request(Method::GET, "/v1/channels", self.request_timeout)
                .query(&[("active_only", "false"), ("public_only", "true")]);
            let resp: wire::ListChannelsResponse = self.send("ListChannels", req).await?;
            Ok::<_, anyhow::Error>(resp.channels.into_iter().map(Channel::from).collect::<Vec<_>>())
        })
        .await
    }

    async fn get_channel_edge(&self, chan_id: u64) -> anyhow::Result<ChannelEdge> {
        let path = format!("/v1/graph/edge/{}", chan_id);
        let path = path.as_str();
        self.with_retry("GetChanInfo", || async move {
            let req = self.request(Method::GET, path, self.request_timeout);
            let resp: wire::WireChannelEdge = self.send("GetChanInfo", req).await?;
            Ok::<_, anyhow::Error>(ChannelEdge::from(resp))
        })
        .await
    }

    async fn update_channel_policy(
        &self,
        update: &PolicyUpdate,
    ) -> anyhow::Result<Vec<FailedUpdate>> {
        let req = self
            .request(Method::POST, "/v1/chanpolicy", self.request_timeout)
            .json(&wire::PolicyUpdateRequest::from(update));
        let resp: wire::PolicyUpdateResponse = self.send("UpdateChannelPolicy", req).await?;
        Ok(resp.failed_updates.into_iter().map(Into::into).collect())
    }

    async fn set_channel_status(
        &self,
        chan_point: &ChannelPoint,
        action: ChanStatusAction,
    ) -> anyhow::Result<()> {
        let req = self
            .request(Method::POST, "/v2/router/updatechanstatus", self.request_timeout)
            .json(&wire::UpdateChanStatusRequest {
                chan_point: chan_point.into(),
                action: action.as_str(),
            });
        let _: serde_json::Value = self.send("UpdateChanStatus", req).await?;
        Ok(())
    }

    async fn get_node_info(&self, pubkey: &str) -> anyhow::Result<RemoteNodeInfo> {
        let path = format!("/v1/graph/node/{}", pubkey);
        let path = path.as_str();
        self.with_retry("GetNodeInfo", || async move {
            let req = self
                .request(Method::GET, path, self.lookup_timeout)
                .query(&[("include_channels", "false")]);
            let resp: wire::NodeInfoResponse = self.send("GetNodeInfo", req).await?;
            resp.node
                .map(RemoteNodeInfo::from)
                .ok_or_else(|| anyhow::anyhow!("node info not available for {}", pubkey))
        })
        .await
    }

    async fn disconnect_peer(&self, pubkey: &str) -> anyhow::Result<()> {
        let path = format!("/v1/peers/{}", pubkey);
        let req = self.request(Method::DELETE, &path, self.request_timeout);
        let _: serde_json::Value = self.send("DisconnectPeer", req).await?;
        Ok(())
    }

    async fn connect_peer(
        &self,
        pubkey: &str,
        host: &str,
        timeout_secs: u64,
    ) -> anyhow::Result<()> {
        // Leave headroom over the node-side connect timeout
        let deadline = Duration::from_secs(timeout_secs) + self.lookup_timeout;
        let req = self
            .request(Method::POST, "/v1/peers", deadline)
            .json(&wire::ConnectPeerRequest {
                addr: wire::LightningAddress {
                    pubkey: pubkey.to_string(),
                    host: host.to_string(),
                },
                perm: false,
                timeout: timeout_secs.to_string(),
            });
        let _: serde_json::Value = self.send("ConnectPeer", req).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock client for testing
// ---------------------------------------------------------------------------
