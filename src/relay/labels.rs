//! Node directory and sender label resolution.
//!
//! The directory is filled by the Meshtastic reader as node info arrives after connecting;
//! the relay core only reads it. Any entry may be missing or half populated at any time.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Label used when nothing better is known about a sender
pub const UNKNOWN_LABEL: &str = "????";

/// Maximum characters taken from the first word of a long name
pub const LONG_NAME_LABEL_MAX: usize = 8;

/// Names reported by a node. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEntry {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

/// Shared, read-mostly map of node id (`!xxxxxxxx`) to names
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    inner: Arc<RwLock<HashMap<String, NodeEntry>>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<NodeEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node_id)
            .cloned()
    }

    /// Insert or replace the names for a node
    pub fn upsert(&self, node_id: impl Into<String>, entry: NodeEntry) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node_id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonical text form of a numeric node id
pub fn node_id_from_num(num: u32) -> String {
    format!("!{:08x}", num)
}

/// `!` followed by at least five characters
pub fn is_mesh_id(node_id: &str) -> bool {
    node_id.starts_with('!') && node_id.chars().count() > 5
}

/// Resolve a short display label for a mesh sender.
///
/// Order: trimmed short name, first word of the long name (capped), last four characters
/// of the id uppercased, then [`UNKNOWN_LABEL`].
pub fn resolve_label(directory: &NodeDirectory, node_id: &str) -> String {
    if let Some(entry) = directory.get(node_id) {
        if let Some(short) = entry.short_name.as_deref().map(str::trim) {
            if !short.is_empty() {
                return short.to_string();
            }
        }
        if let Some(word) = entry
            .long_name
            .as_deref()
            .and_then(|ln| ln.split_whitespace().next())
        {
            return word.chars().take(LONG_NAME_LABEL_MAX).collect();
        }
    }

    if is_mesh_id(node_id) {
        let tail: Vec<char> = node_id.chars().skip(1).collect();
        let start = tail.len().saturating_sub(4);
        return tail[start..].iter().collect::<String>().to_uppercase();
    }

    UNKNOWN_LABEL.to_string()
}
