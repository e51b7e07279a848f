//! Mesh → Signal path.
//!
//! Every decoded text packet heard on the configured channel passes through
//! [`MeshInbound::handle`]: echo/loop suppression, command dispatch, then (in mode 1 only)
//! automatic forwarding to the Signal group. [`MeshInbound::on_packet`] runs each packet in
//! its own task so a failure on one malformed packet is logged and never takes the
//! subscription down.
use log::{debug, error, info, trace};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::commands::{CommandContext, CommandDispatcher, Outbound};
use super::format::{is_relayed, relayed};
use super::labels::{node_id_from_num, resolve_label, NodeDirectory};
use super::queue::{MeshQueueHandle, OutboundMeshMessage};
use super::state::RelayState;
use crate::config::MeshToChat;
use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::signal::ChatLink;

/// Decoded mesh packet as handed over by the radio adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshPacket {
    /// `!xxxxxxxx` sender id, when the adapter knows it
    pub from_id: Option<String>,
    /// Numeric sender id
    pub from: Option<u32>,
    /// Channel index; absent means the primary channel on some firmware
    pub channel: Option<u32>,
    pub hop_start: Option<u32>,
    pub hop_limit: Option<u32>,
    pub decoded: Option<DecodedPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPayload {
    pub text: Option<String>,
}

impl MeshPacket {
    pub fn text(&self) -> Option<&str> {
        self.decoded.as_ref().and_then(|d| d.text.as_deref())
    }

    /// `hop_start - hop_limit` when both are known and consistent
    pub fn hops(&self) -> Option<u32> {
        match (self.hop_start, self.hop_limit) {
            (Some(start), Some(limit)) => start.checked_sub(limit),
            _ => None,
        }
    }

    fn sender_id(&self) -> Option<String> {
        self.from_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.from.map(node_id_from_num))
    }
}

/// Why a packet produced no relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotDecoded,
    OtherChannel,
    NoText,
    NoSender,
    /// Echo mode: non-bridge traffic is ignored
    EchoMode,
    AlreadyRelayed,
    RelayDisabled,
    /// Plain text outside mode 1 needs `!relay`
    NeedsRelayCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Dropped(DropReason),
    EchoConfirmed,
    Command,
    Relayed,
}

#[derive(Debug, Clone)]
pub struct InboundSettings {
    /// Configured mesh channel index
    pub channel: u32,
    pub mesh_to_chat: MeshToChat,
    /// The bridge radio's own `!xxxxxxxx` id, if it could be read
    pub bridge_id: Option<String>,
}

impl InboundSettings {
    /// Index 0 also accepts packets with no channel field (primary channel).
    fn accepts_channel(&self, channel: Option<u32>) -> bool {
        if self.channel == 0 {
            matches!(channel, None | Some(0))
        } else {
            channel == Some(self.channel)
        }
    }
}

pub struct MeshInbound<C: ChatLink> {
    settings: InboundSettings,
    state: Arc<RelayState>,
    dispatcher: CommandDispatcher,
    directory: NodeDirectory,
    queue: MeshQueueHandle,
    chat: Arc<C>,
}

impl<C: ChatLink> MeshInbound<C> {
    pub fn new(
        settings: InboundSettings,
        state: Arc<RelayState>,
        directory: NodeDirectory,
        queue: MeshQueueHandle,
        chat: Arc<C>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(state.clone());
        Self {
            settings,
            state,
            dispatcher,
            directory,
            queue,
            chat,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Consume packets until the adapter drops its sender.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MeshPacket>) {
        while let Some(packet) = rx.recv().await {
            self.on_packet(packet).await;
        }
        debug!("mesh subscription closed");
    }

    /// Per-packet error boundary. Returns `None` when handling failed.
    pub async fn on_packet(self: &Arc<Self>, packet: MeshPacket) -> Option<InboundOutcome> {
        let this = Arc::clone(self);
        let owned = packet.clone();
        match tokio::spawn(async move { this.handle(&owned).await }).await {
            Ok(outcome) => {
                trace!("mesh packet outcome: {:?}", outcome);
                Some(outcome)
            }
            Err(e) => {
                error!("Error handling mesh message: {}", e);
                error!("RAW PACKET: {:?}", packet);
                None
            }
        }
    }

    pub async fn handle(&self, packet: &MeshPacket) -> InboundOutcome {
        if packet.decoded.is_none() {
            return InboundOutcome::Dropped(DropReason::NotDecoded);
        }
        if !self.settings.accepts_channel(packet.channel) {
            trace!(
                "ignoring packet on channel {:?} (configured {})",
                packet.channel,
                self.settings.channel
            );
            return InboundOutcome::Dropped(DropReason::OtherChannel);
        }
        let Some(text) = packet.text().filter(|t| !t.is_empty()) else {
            return InboundOutcome::Dropped(DropReason::NoText);
        };
        let Some(sender_id) = packet.sender_id() else {
            return InboundOutcome::Dropped(DropReason::NoSender);
        };

        if self.settings.mesh_to_chat == MeshToChat::Echo {
            if self.settings.bridge_id.as_deref() == Some(sender_id.as_str()) {
                info!("Echo confirmed: '{}'", truncate_for_log(text, 80));
                return InboundOutcome::EchoConfirmed;
            }
            return InboundOutcome::Dropped(DropReason::EchoMode);
        }

        if is_relayed(text) {
            return InboundOutcome::Dropped(DropReason::AlreadyRelayed);
        }

        let label = resolve_label(&self.directory, &sender_id);
        let ctx = CommandContext {
            sender_id,
            sender_label: label.clone(),
            hops: packet.hops(),
        };

        if let Some(actions) = self.dispatcher.dispatch(text, &ctx) {
            self.perform(actions).await;
            return InboundOutcome::Command;
        }

        let snapshot = self.state.snapshot();
        if !snapshot.enabled {
            return InboundOutcome::Dropped(DropReason::RelayDisabled);
        }
        if !snapshot.mode.auto_mesh_to_chat() {
            return InboundOutcome::Dropped(DropReason::NeedsRelayCommand);
        }

        self.send_to_chat(&relayed(&label, text), &label).await;
        InboundOutcome::Relayed
    }

    async fn perform(&self, actions: Vec<Outbound>) {
        for action in actions {
            match action {
                Outbound::Mesh(text) => {
                    self.queue.submit(OutboundMeshMessage::feedback(text));
                }
                Outbound::Chat { text, label } => self.send_to_chat(&text, &label).await,
            }
        }
    }

    async fn send_to_chat(&self, text: &str, label: &str) {
        if self.chat.send(text).await {
            metrics::inc_mesh_to_chat_relayed();
            info!("Relayed Mesh → Signal ({})", escape_log(label));
        } else {
            error!("Signal send failed for message from {}", escape_log(label));
        }
    }
}
