//! Configuration validation errors and mesh text sanitation

/// Configuration problems that prevent the bridge from starting
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Signal group id is not configured (set signal.group_id or SIGNAL_GROUP_ID)")]
    MissingGroupId,

    #[error("Mesh device path is not configured (set meshtastic.port or MESH_DEVICE)")]
    MissingDevice,

    #[error("Mesh channel index {0} is out of range (0-7)")]
    ChannelOutOfRange(u32),

    #[error("Signal poll interval must be at least 1 second")]
    ZeroPollInterval,

    #[error("Mesh text limit {0} is too small (minimum {} bytes)", MIN_MESH_TEXT_BYTES)]
    TextLimitTooSmall(usize),
}

/// Smallest `max_text_bytes` that still carries a label and some text
pub const MIN_MESH_TEXT_BYTES: usize = 16;

/// Prepare text for transmission on the mesh.
///
/// Control characters are removed (newlines are kept) and the result is cut to at most
/// `max_bytes` bytes on a UTF-8 boundary, with a trailing ellipsis when anything was cut and
/// the ellipsis itself fits.
pub fn sanitize_mesh_text(content: &str, max_bytes: usize) -> String {
    let sanitized: String = content
        .chars()
        .filter(|&c| !c.is_control() || c == '\n')
        .collect();

    if sanitized.len() <= max_bytes {
        return sanitized;
    }

    const ELLIPSIS: char = '…';
    let with_ellipsis = max_bytes > ELLIPSIS.len_utf8();
    let budget = if with_ellipsis {
        max_bytes - ELLIPSIS.len_utf8()
    } else {
        max_bytes
    };
    let mut cut = budget.min(sanitized.len());
    while cut > 0 && !sanitized.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = sanitized[..cut].to_string();
    if with_ellipsis {
        out.push(ELLIPSIS);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_chars_keeps_newline() {
        assert_eq!(sanitize_mesh_text("a\u{7}b\nc\r", 50), "ab\nc");
    }

    #[test]
    fn short_text_untouched() {
        assert_eq!(sanitize_mesh_text("[Bob] hello", 200), "[Bob] hello");
    }

    #[test]
    fn truncates_on_char_boundary() {
        // 📢 is 4 bytes; a 6 byte budget leaves room for "ab" + ellipsis (3 bytes)
        let out = sanitize_mesh_text("ab📢cd", 6);
        assert_eq!(out, "ab…");
        assert!(out.len() <= 6);
    }

    #[test]
    fn tiny_limit_drops_ellipsis() {
        assert_eq!(sanitize_mesh_text("abcdef", 2), "ab");
        assert_eq!(sanitize_mesh_text("abcdef", 3), "abc");
        assert_eq!(sanitize_mesh_text("📢📢", 3), "");
        assert_eq!(sanitize_mesh_text("abcdef", 0), "");
        assert_eq!(sanitize_mesh_text("abcdef", 4), "a…");
    }

    #[test]
    fn truncated_length_within_limit() {
        let long = "x".repeat(500);
        let out = sanitize_mesh_text(&long, 200);
        assert!(out.len() <= 200);
        assert!(out.ends_with('…'));
    }
}
