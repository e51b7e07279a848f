//! Logging helpers for untrusted text (mesh payloads, Signal messages, sender names).
//! Keeps every log record on one line and caps its length.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Other control characters become `\xNN`. Strings over 300 chars end with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape and cut to `max_bytes`, never splitting a multi-byte character.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Lowercase hex preview of the first `max` bytes
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_tabs() {
        let esc = escape_log("Line1\nLine2\r\tEnd");
        assert_eq!(esc, "Line1\\nLine2\\r\\tEnd");
    }

    #[test]
    fn node_name_cannot_forge_log_lines() {
        let esc = escape_log("ALC\n2026-01-01 INFO Relay DISABLED (admin)");
        assert!(!esc.contains('\n'));
        assert!(esc.starts_with("ALC\\n"));
    }

    #[test]
    fn truncate_does_not_split_emoji() {
        // 📢 is 4 bytes; max 5 leaves a 2 byte budget which lands before it
        assert_eq!(truncate_for_log("ab📢cd", 5), "ab...");
    }

    #[test]
    fn no_truncation_within_limit() {
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }

    #[test]
    fn hex_preview() {
        assert_eq!(hex_snippet(&[0x94, 0xc3, 0x00, 0x10], 3), "94c300");
    }
}
