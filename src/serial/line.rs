//! Bounded serial lines.
//!
//! Every line written to the host is at most [`MAX_LINE_PAYLOAD`] bytes of
//! ASCII text followed by `\r\n`. Line-ending bytes (`\r`, `\n`, `\0`)
//! inside the payload are written as spaces, so one message is always one
//! host line. Receiving works the other way round: the host sends bytes one
//! at a time and [`LineAssembler`] hands back complete lines.
use log::warn;

/// Payload bytes allowed before the terminator.
pub const MAX_LINE_PAYLOAD: usize = 64;

/// Byte written in place of the last payload byte when a line was cut.
pub const TRUNCATION_MARKER: u8 = b'>';

pub const TERMINATOR: &[u8; TERMINATOR_LEN] = b"\r\n";
const TERMINATOR_LEN: usize = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line payload of {len} bytes exceeds the {max}-byte line buffer")]
    Overflow { len: usize, max: usize },
}

/// One outbound line in a fixed-size buffer: payload plus `\r\n`.
#[derive(Clone, PartialEq, Eq)]
pub struct SerialLine {
    buf: [u8; MAX_LINE_PAYLOAD + TERMINATOR_LEN],
    len: usize,
    truncated: bool,
}

impl SerialLine {
    /// Build a line, clamping oversized payloads to the buffer and marking
    /// the cut with [`TRUNCATION_MARKER`] as the last payload byte.
    pub fn clamped(payload: &[u8]) -> Self {
        let payload = strip_terminator(payload);
        let truncated = payload.len() > MAX_LINE_PAYLOAD;
        let take = payload.len().min(MAX_LINE_PAYLOAD);
        let mut line = Self::from_fitting(&payload[..take]);
        if truncated {
            line.buf[MAX_LINE_PAYLOAD - 1] = TRUNCATION_MARKER;
            line.truncated = true;
        }
        line
    }

    /// Build a line that must fit as-is.
    pub fn exact(payload: &[u8]) -> Result<Self, LineError> {
        let payload = strip_terminator(payload);
        if payload.len() > MAX_LINE_PAYLOAD {
            return Err(LineError::Overflow {
                len: payload.len(),
                max: MAX_LINE_PAYLOAD,
            });
        }
        Ok(Self::from_fitting(payload))
    }

    fn from_fitting(payload: &[u8]) -> Self {
        let mut buf = [0u8; MAX_LINE_PAYLOAD + TERMINATOR_LEN];
        for (dst, &b) in buf.iter_mut().zip(payload) {
            *dst = if is_line_break(b) { b' ' } else { b };
        }
        buf[payload.len()..payload.len() + TERMINATOR_LEN].copy_from_slice(TERMINATOR);
        SerialLine {
            buf,
            len: payload.len(),
            truncated: false,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Payload followed by the terminator, ready for the link.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len + TERMINATOR_LEN]
    }

    pub fn payload_len(&self) -> usize {
        self.len
    }

    pub fn was_truncated(&self) -> bool {
        self.truncated
    }
}

impl std::fmt::Debug for SerialLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLine")
            .field("payload", &crate::logutil::escape_log(self.payload()))
            .field("truncated", &self.truncated)
            .finish()
    }
}

fn is_line_break(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | 0)
}

fn strip_terminator(mut payload: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = payload.split_last() {
        if last == b'\n' || last == b'\r' {
            payload = rest;
        } else {
            break;
        }
    }
    payload
}

/// Collects host bytes into lines ending in `\r`, `\n` or `\0`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    overflowed: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        LineAssembler {
            buf: Vec::with_capacity(MAX_LINE_PAYLOAD),
            overflowed: false,
        }
    }

    /// Feed one received byte. Returns a complete line (terminator excluded)
    /// when `byte` ends one. Empty lines and over-long lines yield nothing.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            b'\r' | b'\n' | 0 => {
                let overflowed = std::mem::take(&mut self.overflowed);
                let line = std::mem::take(&mut self.buf);
                if overflowed || line.is_empty() {
                    None
                } else {
                    Some(line)
                }
            }
            _ if self.overflowed => None,
            _ if self.buf.len() >= MAX_LINE_PAYLOAD => {
                warn!(
                    "serial rx line longer than {} bytes, discarding",
                    MAX_LINE_PAYLOAD
                );
                self.buf.clear();
                self.overflowed = true;
                None
            }
            _ => {
                self.buf.push(byte);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_line_is_terminated() {
        let line = SerialLine::clamped(b"id:5;alive:3");
        assert_eq!(line.as_bytes(), b"id:5;alive:3\r\n");
        assert!(!line.was_truncated());
    }

    #[test]
    fn oversized_payload_is_clamped_with_marker() {
        let payload = vec![b'x'; 80];
        let line = SerialLine::clamped(&payload);
        assert_eq!(line.payload_len(), MAX_LINE_PAYLOAD);
        assert_eq!(line.payload()[MAX_LINE_PAYLOAD - 1], TRUNCATION_MARKER);
        assert!(line.as_bytes().ends_with(b"\r\n"));
        assert_eq!(line.as_bytes().len(), MAX_LINE_PAYLOAD + 2);
        assert!(line.was_truncated());
    }

    #[test]
    fn exactly_max_fits_without_marker() {
        let payload = vec![b'y'; MAX_LINE_PAYLOAD];
        let line = SerialLine::clamped(&payload);
        assert!(!line.was_truncated());
        assert_eq!(line.payload(), &payload[..]);
    }

    #[test]
    fn exact_rejects_oversize() {
        let err = SerialLine::exact(&[b'z'; 65]).unwrap_err();
        assert_eq!(err, LineError::Overflow { len: 65, max: 64 });
        assert!(SerialLine::exact(b"pong\r\n").is_ok());
    }

    #[test]
    fn interior_line_breaks_become_spaces() {
        let line = SerialLine::exact(b"unknown:a\nb\r\0c\r\n").unwrap();
        assert_eq!(line.as_bytes(), b"unknown:a b  c\r\n");
        let clamped = SerialLine::clamped(b"x\ny");
        assert_eq!(clamped.payload(), b"x y");
        assert_eq!(
            clamped.as_bytes().iter().filter(|&&b| b == b'\n').count(),
            1
        );
    }

    #[test]
    fn assembler_splits_on_any_terminator() {
        let mut asm = LineAssembler::new();
        let mut lines = Vec::new();
        for &b in b"ping\r\nid\0\n\nstats\r" {
            if let Some(line) = asm.push(b) {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec![b"ping".to_vec(), b"id".to_vec(), b"stats".to_vec()]);
    }

    #[test]
    fn assembler_discards_overlong_line_until_terminator() {
        let mut asm = LineAssembler::new();
        for _ in 0..100 {
            assert!(asm.push(b'a').is_none());
        }
        assert!(asm.push(b'\n').is_none());
        for &b in b"ok" {
            asm.push(b);
        }
        assert_eq!(asm.push(b'\n'), Some(b"ok".to_vec()));
    }
}
