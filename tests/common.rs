//! Test utilities & fakes.
//! In-memory stand-ins for the radio and the Signal daemon.
#![allow(dead_code)]

use meshbridge::relay::mesh_inbound::DecodedPayload;
use meshbridge::relay::{MeshPacket, MeshSender};
use meshbridge::signal::{ChatLink, DataMessage, Envelope, GroupInfo, ReceivedItem, SyncMessage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const GROUP: &str = "group-abc==";

#[derive(Debug, Clone)]
pub struct SentText {
    pub text: String,
    pub channel: u32,
    pub at: Instant,
}

/// Records every mesh send; texts containing `fail_marker` fail.
#[derive(Default)]
pub struct RecordingMesh {
    sent: Mutex<Vec<SentText>>,
    pub fail_marker: Option<String>,
}

impl RecordingMesh {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }
}

impl MeshSender for RecordingMesh {
    fn send_text(&self, text: &str, channel: u32) -> anyhow::Result<()> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                anyhow::bail!("simulated radio failure");
            }
        }
        self.sent.lock().unwrap().push(SentText {
            text: text.to_string(),
            channel,
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Signal fake: records sends, replays scripted `receive` batches.
#[derive(Default)]
pub struct FakeChat {
    sent: Mutex<Vec<String>>,
    inbox: Mutex<VecDeque<Vec<ReceivedItem>>>,
}

impl FakeChat {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn push_batch(&self, batch: Vec<ReceivedItem>) {
        self.inbox.lock().unwrap().push_back(batch);
    }
}

impl ChatLink for FakeChat {
    async fn send(&self, message: &str) -> bool {
        self.sent.lock().unwrap().push(message.to_string());
        true
    }

    async fn receive(&self) -> Vec<ReceivedItem> {
        self.inbox.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// Poll until the fake radio has seen `n` sends or `timeout` elapses.
pub async fn wait_for_sends(mesh: &RecordingMesh, n: usize, timeout: Duration) -> Vec<SentText> {
    let deadline = Instant::now() + timeout;
    loop {
        let sent = mesh.sent();
        if sent.len() >= n || Instant::now() >= deadline {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn mesh_text(from: u32, channel: Option<u32>, text: &str) -> MeshPacket {
    MeshPacket {
        from_id: Some(format!("!{:08x}", from)),
        from: Some(from),
        channel,
        hop_start: Some(3),
        hop_limit: Some(3),
        decoded: Some(DecodedPayload {
            text: Some(text.to_string()),
        }),
    }
}

pub fn group_message(text: &str, group: &str) -> DataMessage {
    DataMessage {
        timestamp: None,
        message: Some(text.to_string()),
        group_info: Some(GroupInfo {
            group_id: Some(group.to_string()),
        }),
    }
}

pub fn envelope(ts: i64, name: Option<&str>, text: &str) -> Envelope {
    Envelope {
        timestamp: Some(ts),
        source: Some("+15550001111".into()),
        source_number: Some("+15550001111".into()),
        source_name: name.map(String::from),
        data_message: Some(group_message(text, GROUP)),
        ..Default::default()
    }
}

pub fn sync_envelope(ts: i64, name: Option<&str>, text: &str) -> Envelope {
    Envelope {
        timestamp: Some(ts),
        source_name: name.map(String::from),
        sync_message: Some(SyncMessage {
            sent_message: Some(group_message(text, GROUP)),
        }),
        ..Default::default()
    }
}

pub fn item(env: Envelope) -> ReceivedItem {
    ReceivedItem {
        envelope: Some(env),
    }
}
