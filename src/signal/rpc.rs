//! Minimal JSON-RPC 2.0 client for the signal-cli HTTP daemon.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

pub const DEFAULT_RPC_URL: &str = "http://localhost:8080/api/v1/rpc";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("request timeout after {0}s")]
    Timeout(u64),
    #[error("daemon returned status {0}")]
    Status(u16),
    #[error("failed to parse JSON response: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Decoded reply. An empty reply (no result, no error) stands in for any transport failure.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RpcReply {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcReply {
    pub fn is_empty(&self) -> bool {
        self.result.is_none() && self.error.is_none()
    }
}

pub struct RpcClient {
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call. Transport, status and decode failures are logged and yield an empty
    /// reply; callers treat that as "no data".
    pub async fn call(&self, method: &str, params: Value) -> RpcReply {
        match self.try_call(method, params).await {
            Ok(reply) => {
                if let Some(err) = &reply.error {
                    warn!(
                        "Signal RPC {} returned error {}: {}",
                        method, err.code, err.message
                    );
                }
                reply
            }
            Err(e) => {
                warn!("Signal RPC {} failed: {}", method, e);
                RpcReply::default()
            }
        }
    }

    async fn try_call(&self, method: &str, params: Value) -> Result<RpcReply, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        debug!("Signal RPC -> {} (id {})", method, id);

        let exchange = async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(RpcError::Transport)?;
            if !response.status().is_success() {
                return Err(RpcError::Status(response.status().as_u16()));
            }
            response.json::<RpcReply>().await.map_err(RpcError::Decode)
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout.as_secs()))?
    }
}
