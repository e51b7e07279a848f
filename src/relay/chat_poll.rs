//! Signal → mesh path.
//!
//! The poller drains the Signal daemon every few seconds and feeds each envelope through
//! [`ChatPoller::handle_envelope`]. Anything older than the start cutoff is dropped so a
//! restart does not replay the backlog onto the mesh.
use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::format::{is_relayed, relayed, status_message, PRIMARY_BLOCK_MESSAGE};
use super::queue::{MeshQueueHandle, OutboundMeshMessage};
use super::state::RelayState;
use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::signal::{ChatLink, Envelope, ReceivedItem};

/// Marker a sender must carry in their profile name while in dev mode
pub const DEV_MARKER: char = '🔧';

/// Sender label when neither profile name nor number is known
pub const FALLBACK_SENDER: &str = "Signal";

const STATS_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ChatPollSettings {
    pub group_id: String,
    /// Configured mesh channel; 0 blocks Signal → mesh
    pub mesh_channel: u32,
    pub short_names: bool,
    pub dev_mode: bool,
    pub filter_enabled: bool,
    pub filter_chars: Vec<char>,
    /// Envelopes with a timestamp below this (ms) are ignored
    pub cutoff_ms: i64,
}

impl ChatPollSettings {
    /// Cutoff for a bridge started at `started_ms` that tolerates `skew` of clock drift.
    pub fn cutoff_for(started_ms: i64, skew: Duration) -> i64 {
        started_ms - skew.as_millis() as i64
    }
}

/// Why an envelope was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Stale,
    NoMessage,
    OtherGroup,
    AlreadyRelayed,
    /// `!status` answered in the group
    StatusAnswered,
    RelayDisabled,
    ModeClosed,
    PrimaryChannelBlocked,
    DevFiltered,
    SenderFiltered,
    Queued,
}

/// Label for a Signal sender: profile name, then phone number, then [`FALLBACK_SENDER`].
/// With `short_names` only the first word is kept.
pub fn sender_label(profile_name: Option<&str>, phone: Option<&str>, short_names: bool) -> String {
    let name = profile_name
        .filter(|n| !n.is_empty())
        .or(phone.filter(|p| !p.is_empty()))
        .unwrap_or(FALLBACK_SENDER);
    if short_names {
        return name.split(' ').next().unwrap_or(name).to_string();
    }
    name.to_string()
}

pub struct ChatPoller<C: ChatLink> {
    settings: ChatPollSettings,
    state: Arc<RelayState>,
    queue: MeshQueueHandle,
    chat: Arc<C>,
}

impl<C: ChatLink> ChatPoller<C> {
    pub fn new(
        settings: ChatPollSettings,
        state: Arc<RelayState>,
        queue: MeshQueueHandle,
        chat: Arc<C>,
    ) -> Self {
        Self {
            settings,
            state,
            queue,
            chat,
        }
    }

    /// Poll forever, sleeping `interval` between polls.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut last_stats = Instant::now();
        loop {
            let items = self.chat.receive().await;
            if !items.is_empty() {
                debug!("Signal poll returned {} item(s)", items.len());
                self.handle_items(&items).await;
            }
            if last_stats.elapsed() >= STATS_INTERVAL {
                info!("Relay stats: {}", metrics::snapshot());
                last_stats = Instant::now();
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn handle_items(&self, items: &[ReceivedItem]) -> Vec<ChatOutcome> {
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let Some(env) = &item.envelope else {
                outcomes.push(ChatOutcome::NoMessage);
                continue;
            };
            outcomes.push(self.handle_envelope(env).await);
        }
        outcomes
    }

    pub async fn handle_envelope(&self, env: &Envelope) -> ChatOutcome {
        let ts = env.timestamp_ms();
        if ts < self.settings.cutoff_ms {
            metrics::inc_stale_chat_dropped();
            debug!("Dropping stale Signal message (ts {})", ts);
            return ChatOutcome::Stale;
        }

        let Some(msg) = env.group_message() else {
            return ChatOutcome::NoMessage;
        };
        let Some(text) = msg.text().filter(|t| !t.is_empty()) else {
            return ChatOutcome::NoMessage;
        };
        if msg.group_id() != Some(self.settings.group_id.as_str()) {
            return ChatOutcome::OtherGroup;
        }
        if is_relayed(text) {
            return ChatOutcome::AlreadyRelayed;
        }

        let label = sender_label(
            env.source_name.as_deref(),
            env.phone(),
            self.settings.short_names,
        );

        if text.trim().eq_ignore_ascii_case("!status") {
            let reply = status_message(self.state.snapshot());
            self.chat.send(&reply).await;
            info!("Executing Signal command: !status ({})", escape_log(&label));
            return ChatOutcome::StatusAnswered;
        }

        let snapshot = self.state.snapshot();
        if !snapshot.enabled {
            return ChatOutcome::RelayDisabled;
        }
        if !snapshot.mode.chat_to_mesh_open() {
            return ChatOutcome::ModeClosed;
        }
        if self.settings.mesh_channel == 0 {
            self.chat.send(PRIMARY_BLOCK_MESSAGE).await;
            return ChatOutcome::PrimaryChannelBlocked;
        }

        info!(
            "Signal message from {}: '{}'",
            escape_log(&label),
            truncate_for_log(text, 80)
        );

        let raw_name = env.source_name.as_deref().unwrap_or("");
        if self.settings.dev_mode && !raw_name.contains(DEV_MARKER) {
            info!(
                "Dev mode: skipping Signal → Mesh for {} (no {})",
                escape_log(&label),
                DEV_MARKER
            );
            return ChatOutcome::DevFiltered;
        }
        if self.settings.filter_enabled
            && !self
                .settings
                .filter_chars
                .iter()
                .any(|c| raw_name.contains(*c))
        {
            info!(
                "Sender filter: skipping Signal → Mesh for {} (no filter char)",
                escape_log(&label)
            );
            return ChatOutcome::SenderFiltered;
        }

        self.queue
            .submit(OutboundMeshMessage::relay(relayed(&label, text), label));
        metrics::inc_chat_to_mesh_queued();
        ChatOutcome::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_label_fallbacks() {
        assert_eq!(sender_label(Some("Alice Smith"), Some("+1"), false), "Alice Smith");
        assert_eq!(sender_label(Some("Alice Smith"), Some("+1"), true), "Alice");
        assert_eq!(sender_label(None, Some("+15550001"), true), "+15550001");
        assert_eq!(sender_label(Some(""), None, false), FALLBACK_SENDER);
    }

    #[test]
    fn cutoff_subtracts_skew() {
        assert_eq!(
            ChatPollSettings::cutoff_for(1_000_000, Duration::from_secs(600)),
            400_000
        );
    }
}
