//! Logging helpers that keep payload bytes on a single readable log line.
//! Mesh payloads and serial lines are raw bytes, so anything that is not
//! printable ASCII is escaped before it reaches the logger.

use std::fmt::Write;

/// Longest preview emitted for a single payload (bytes of input, not output).
const MAX_PREVIEW: usize = 96;

/// Escape a byte slice for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - `\0` => `\\0`
/// - backslash => `\\\\`
/// - other non-printable bytes => `\\xNN`
///
/// Inputs longer than the preview limit end with an ellipsis.
pub fn escape_log(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().min(MAX_PREVIEW) + 8);
    for (count, &b) in data.iter().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0 => out.push_str("\\0"),
            0x20..=0x7e => out.push(b as char),
            other => {
                let _ = write!(&mut out, "\\x{:02X}", other);
            }
        }
    }
    out
}

/// Lowercase hex without separators, used for frame dumps at trace level.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}
