//! Text formats shared by both relay directions.
//!
//! Everything the bridge emits starts with a bracketed tag: `[label] text` for relayed
//! messages and `[BRIDGE] text` for bridge feedback. Inbound text that already starts with
//! `[` is therefore treated as bridge output and never relayed again.
use super::state::RelaySnapshot;

pub const BRIDGE_TAG: &str = "BRIDGE";

pub const PRIMARY_BLOCK_MESSAGE: &str = "[BRIDGE] Signal → Mesh relay is disabled while MESH_CHANNEL_INDEX=0 (Primary). \
This mode is only for testing Mesh → Signal. Please set MESH_CHANNEL_INDEX to a different channel.";

/// `[label] text`
pub fn relayed(label: &str, text: &str) -> String {
    format!("[{}] {}", label, text)
}

/// `[BRIDGE] text`
pub fn bridge_message(text: &str) -> String {
    relayed(BRIDGE_TAG, text)
}

/// Loop prevention: bracket-prefixed text is bridge output.
pub fn is_relayed(text: &str) -> bool {
    text.starts_with('[')
}

pub fn status_message(state: RelaySnapshot) -> String {
    let relay_state = if state.enabled { "ON" } else { "OFF" };
    bridge_message(&format!(
        "Message relaying is {}. {} is active.",
        relay_state, state.mode
    ))
}
