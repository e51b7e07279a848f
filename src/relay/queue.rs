//! Outbound mesh queue.
//!
//! Every mesh-bound text (bridge feedback and Signal → mesh relays) goes through one FIFO
//! drained by a single task. After each send the consumer waits a fixed gap before taking
//! the next item so the bridge never floods the radio channel's airtime.
//!
//! Failure policy: a failed send is logged and dropped. There is no retry and no
//! backpressure; the queue is unbounded.
use anyhow::Result;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::validation::sanitize_mesh_text;

/// Default spacing between mesh sends
pub const DEFAULT_SEND_GAP: Duration = Duration::from_millis(3200);

/// The mesh side of the bridge as seen by the queue.
///
/// `send_text` may block (serial writes); the queue calls it from a blocking task.
pub trait MeshSender: Send + Sync + 'static {
    fn send_text(&self, text: &str, channel: u32) -> Result<()>;
}

impl<T: MeshSender + ?Sized> MeshSender for Arc<T> {
    fn send_text(&self, text: &str, channel: u32) -> Result<()> {
        (**self).send_text(text, channel)
    }
}

/// One queued mesh transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMeshMessage {
    pub text: String,
    /// Signal sender the text is relayed for, if any
    pub sender_label: Option<String>,
    /// Log a "Relayed Signal → Mesh" line after a successful send
    pub log_relay: bool,
}

impl OutboundMeshMessage {
    /// Bridge feedback: no sender, not logged as a relay
    pub fn feedback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_label: None,
            log_relay: false,
        }
    }

    pub fn relay(text: impl Into<String>, sender_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender_label: Some(sender_label.into()),
            log_relay: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Mesh channel index every message is sent on
    pub channel: u32,
    pub send_gap: Duration,
    pub max_text_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            send_gap: DEFAULT_SEND_GAP,
            max_text_bytes: 200,
        }
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    pending: AtomicUsize,
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub sent: u64,
    pub failed: u64,
}

/// Producer side of the queue. Cheap to clone; usable from any task or thread.
#[derive(Debug, Clone)]
pub struct MeshQueueHandle {
    tx: mpsc::UnboundedSender<OutboundMeshMessage>,
    counters: Arc<QueueCounters>,
}

impl MeshQueueHandle {
    /// Append a message. Returns false only if the consumer has stopped.
    pub fn submit(&self, msg: OutboundMeshMessage) -> bool {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(msg).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            error!("Mesh queue consumer stopped; dropping message");
            return false;
        }
        true
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.counters.pending.load(Ordering::SeqCst),
            sent: self.counters.sent.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

/// Spawn the consumer task and return the producer handle.
///
/// The task ends once every handle has been dropped and the queue is drained.
pub fn start_mesh_queue<S: MeshSender>(
    sender: Arc<S>,
    cfg: QueueConfig,
) -> (MeshQueueHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMeshMessage>();
    let counters = Arc::new(QueueCounters::default());
    let handle = MeshQueueHandle {
        tx,
        counters: counters.clone(),
    };

    let task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            counters.pending.fetch_sub(1, Ordering::SeqCst);
            let text = sanitize_mesh_text(&msg.text, cfg.max_text_bytes);
            let preview = truncate_for_log(&text, 80);
            let s = sender.clone();
            let channel = cfg.channel;
            let result =
                tokio::task::spawn_blocking(move || s.send_text(&text, channel)).await;

            match result {
                Ok(Ok(())) => {
                    counters.sent.fetch_add(1, Ordering::SeqCst);
                    metrics::inc_mesh_sends_ok();
                    debug!("Mesh send ok (channel {}): '{}'", channel, preview);
                    if msg.log_relay {
                        match &msg.sender_label {
                            Some(label) => {
                                info!("Relayed Signal → Mesh ({})", escape_log(label))
                            }
                            None => info!("Relayed Signal → Mesh"),
                        }
                    }
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    metrics::inc_mesh_sends_failed();
                    error!("Mesh send failed, interface may be down: {}", e);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    metrics::inc_mesh_sends_failed();
                    error!("Mesh send task failed: {}", e);
                }
            }

            tokio::time::sleep(cfg.send_gap).await;
        }
        debug!("mesh queue consumer terminated");
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakySender {
        sent: Mutex<Vec<String>>,
    }

    impl MeshSender for FlakySender {
        fn send_text(&self, text: &str, _channel: u32) -> Result<()> {
            if text.contains("fail") {
                anyhow::bail!("radio unplugged");
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn fast_cfg() -> QueueConfig {
        QueueConfig {
            channel: 2,
            send_gap: Duration::from_millis(5),
            max_text_bytes: 200,
        }
    }

    #[tokio::test]
    async fn failure_is_dropped_and_queue_continues() {
        let sender = Arc::new(FlakySender::default());
        let (handle, task) = start_mesh_queue(sender.clone(), fast_cfg());
        handle.submit(OutboundMeshMessage::feedback("one"));
        handle.submit(OutboundMeshMessage::relay("please fail", "Bob"));
        handle.submit(OutboundMeshMessage::feedback("three"));
        let stats_handle = handle.clone();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("queue drained")
            .unwrap();
        assert_eq!(*sender.sent.lock().unwrap(), vec!["one", "three"]);
        let stats = stats_handle.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn long_text_is_truncated_before_send() {
        let sender = Arc::new(FlakySender::default());
        let mut cfg = fast_cfg();
        cfg.max_text_bytes = 10;
        let (handle, task) = start_mesh_queue(sender.clone(), cfg);
        handle.submit(OutboundMeshMessage::feedback("0123456789abcdef"));
        drop(handle);
        task.await.unwrap();
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].len() <= 10);
        assert!(sent[0].starts_with("0123456"));
    }
}
