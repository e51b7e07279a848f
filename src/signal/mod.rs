//! Signal side of the bridge.
//!
//! [`ChatLink`] is what the relay core needs from the group chat: send one text to the group
//! and fetch whatever arrived since the last poll. [`SignalClient`] implements it on top of
//! the signal-cli JSON-RPC daemon.
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

pub mod rpc;

pub use rpc::{RpcClient, RpcError, RpcReply, DEFAULT_RPC_TIMEOUT, DEFAULT_RPC_URL};

/// Group chat transport as seen by the relay.
pub trait ChatLink: Send + Sync + 'static {
    /// Send `message` to the configured group. Returns false when the daemon gave no result.
    fn send(&self, message: &str) -> impl Future<Output = bool> + Send;

    /// Fetch pending envelopes. Failures yield an empty list.
    fn receive(&self) -> impl Future<Output = Vec<ReceivedItem>> + Send;
}

/// One element of a `receive` result
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ReceivedItem {
    #[serde(default)]
    pub envelope: Option<Envelope>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_number: Option<String>,
    #[serde(default)]
    pub source_uuid: Option<String>,
    /// Profile name
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub data_message: Option<DataMessage>,
    #[serde(default)]
    pub sync_message: Option<SyncMessage>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub group_info: Option<GroupInfo>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(default)]
    pub sent_message: Option<DataMessage>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Envelope {
    /// The group message this envelope carries: a regular data message, or failing that a
    /// message sent from the linked account itself.
    pub fn group_message(&self) -> Option<&DataMessage> {
        if let Some(dm) = &self.data_message {
            return Some(dm);
        }
        self.sync_message
            .as_ref()
            .and_then(|s| s.sent_message.as_ref())
    }

    /// Envelope timestamp in ms, 0 when absent
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.unwrap_or(0)
    }

    /// Phone number of the sender, if reported
    pub fn phone(&self) -> Option<&str> {
        self.source_number
            .as_deref()
            .or(self.source.as_deref())
            .filter(|s| !s.is_empty())
    }
}

impl DataMessage {
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_info.as_ref().and_then(|g| g.group_id.as_deref())
    }
}

/// Parse a `receive` result value item by item; malformed items are skipped.
pub fn parse_received(result: &Value) -> Vec<ReceivedItem> {
    let Some(items) = result.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<ReceivedItem>(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Skipping malformed Signal envelope: {}", e);
                None
            }
        })
        .collect()
}

/// signal-cli JSON-RPC client bound to one group
pub struct SignalClient {
    rpc: RpcClient,
    group_id: String,
}

impl SignalClient {
    pub fn new(url: impl Into<String>, group_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            rpc: RpcClient::new(url, timeout),
            group_id: group_id.into(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }
}

impl ChatLink for SignalClient {
    async fn send(&self, message: &str) -> bool {
        let reply = self
            .rpc
            .call(
                "send",
                json!({ "groupId": self.group_id, "message": message }),
            )
            .await;
        if reply.result.is_none() {
            warn!("Signal send produced no result");
            return false;
        }
        true
    }

    async fn receive(&self) -> Vec<ReceivedItem> {
        let reply = self.rpc.call("receive", json!({})).await;
        match reply.result {
            Some(result) => parse_received(&result),
            None => Vec::new(),
        }
    }
}
