//! Relay engine: policy state, mesh commands, the outbound mesh queue and the two inbound
//! processors.
//!
//! Nothing in here touches a serial port or HTTP directly. The mesh is reached through
//! [`queue::MeshSender`] and the Signal group through [`crate::signal::ChatLink`].
use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod chat_poll;
pub mod commands;
pub mod format;
pub mod labels;
pub mod mesh_inbound;
pub mod queue;
pub mod state;

pub use chat_poll::{ChatOutcome, ChatPollSettings, ChatPoller};
pub use commands::{CommandContext, CommandDispatcher, Outbound};
pub use labels::{NodeDirectory, NodeEntry};
pub use mesh_inbound::{InboundOutcome, InboundSettings, MeshInbound, MeshPacket};
pub use queue::{start_mesh_queue, MeshQueueHandle, MeshSender, OutboundMeshMessage, QueueConfig};
pub use state::{RelayMode, RelaySnapshot, RelayState};

use crate::config::Config;
use crate::signal::ChatLink;

/// The wired-up relay: shared state, a running mesh queue and both processors.
pub struct RelayCore<C: ChatLink> {
    pub state: Arc<RelayState>,
    pub queue: MeshQueueHandle,
    pub queue_task: JoinHandle<()>,
    pub inbound: Arc<MeshInbound<C>>,
    pub poller: Arc<ChatPoller<C>>,
}

impl<C: ChatLink> RelayCore<C> {
    /// Start the mesh queue and build both processors from `config`.
    ///
    /// `started_ms` is the bridge start time used for the stale-message cutoff.
    pub fn start<S: MeshSender>(
        config: &Config,
        sender: Arc<S>,
        directory: NodeDirectory,
        bridge_id: Option<String>,
        chat: Arc<C>,
        started_ms: i64,
    ) -> Self {
        let state = Arc::new(RelayState::new(config.bridge.relay_mode()));
        let (queue, queue_task) = start_mesh_queue(
            sender,
            QueueConfig {
                channel: config.meshtastic.channel,
                send_gap: config.meshtastic.send_gap(),
                max_text_bytes: config.meshtastic.max_text_bytes,
            },
        );

        let inbound = Arc::new(MeshInbound::new(
            InboundSettings {
                channel: config.meshtastic.channel,
                mesh_to_chat: config.bridge.mesh_to_chat(),
                bridge_id,
            },
            state.clone(),
            directory,
            queue.clone(),
            chat.clone(),
        ));

        let poller = Arc::new(ChatPoller::new(
            ChatPollSettings {
                group_id: config.signal.group_id.clone(),
                mesh_channel: config.meshtastic.channel,
                short_names: config.signal.short_names,
                dev_mode: config.bridge.dev_mode,
                filter_enabled: config.signal.filter_enabled,
                filter_chars: config.filter_chars(),
                cutoff_ms: ChatPollSettings::cutoff_for(
                    started_ms,
                    std::time::Duration::from_secs(config.signal.startup_skew_minutes * 60),
                ),
            },
            state.clone(),
            queue.clone(),
            chat,
        ));

        Self {
            state,
            queue,
            queue_task,
            inbound,
            poller,
        }
    }
}
