//! Helpers that keep radio text and bytes safe to put in single-line logs.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters => `\\xNN`
///
/// Anything past `MAX_PREVIEW` characters is replaced by an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 200;
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

/// UTF-8 safe truncation for log display; never slices inside a multi-byte char.
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

/// Lowercase hex of at most `max` leading bytes.
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
    fn escapes_newlines_and_controls() {
        assert_eq!(escape_log("Line1\nLine2\r\tEnd"), "Line1\\nLine2\\r\\tEnd");
        assert_eq!(escape_log("a\u{1}b"), "a\\x01b");
    }

    #[test]
    fn truncate_does_not_split_multibyte_chars() {
        // "—" is 3 bytes; cut target 7 lands inside it
        assert_eq!(truncate_for_log("12345—7890", 10), "12345...");
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }

    #[test]
    fn hex_snippet_caps_length() {
        assert_eq!(hex_snippet(&[0x3e, 0x01, 0x00, 0x0a], 3), "3e0100");
    }
}
