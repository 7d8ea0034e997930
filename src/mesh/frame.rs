//! Binary frame codec for mesh envelopes.
//!
//! A frame is laid out as:
//!
//!   `[size][control][pid][src][dst][payload ...]`
//!
//! where `size` is the length of the whole frame including itself. Hosts on
//! the serial link may inject frames as a text line of hex tokens:
//!
//!   `tmsg 0x07 0x71 0x0D 0x41 0x19 0x06 0xD0`
use bytes::{BufMut, BytesMut};

use super::{Control, MeshEnvelope, MessageKind, NodeId};

/// Bytes before the payload.
pub const HEADER_LEN: usize = 5;

/// Keyword that prefixes a host-injected raw frame line.
pub const HOST_FRAME_PREFIX: &str = "tmsg";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short ({len} bytes, header is {HEADER_LEN})")]
    TooShort { len: usize },

    #[error("size byte says {declared} but frame has {actual} bytes")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("invalid hex token '{0}'")]
    BadHexToken(String),

    #[error("line is not a host frame (expected '{HOST_FRAME_PREFIX} ...')")]
    NotAFrame,
}

/// Encode an envelope as a binary frame.
pub fn encode(env: &MeshEnvelope) -> Vec<u8> {
    let total = HEADER_LEN + env.payload_length();
    let mut buf = BytesMut::with_capacity(total);
    // MeshEnvelope caps the payload so `total` always fits the size byte.
    buf.put_u8(total as u8);
    buf.put_u8(env.control().to_byte());
    buf.put_u8(env.pid().pid());
    buf.put_u8(env.source_id().0);
    buf.put_u8(env.dest_id().0);
    buf.put_slice(env.payload());
    buf.to_vec()
}

/// Decode a complete binary frame.
pub fn decode(frame: &[u8]) -> Result<MeshEnvelope, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: frame.len() });
    }
    let declared = frame[0] as usize;
    if declared != frame.len() {
        return Err(FrameError::SizeMismatch {
            declared,
            actual: frame.len(),
        });
    }
    let envelope = MeshEnvelope::new(
        NodeId(frame[3]),
        NodeId(frame[4]),
        Control::from_byte(frame[1]),
        MessageKind::from_pid(frame[2]),
        &frame[HEADER_LEN..],
    )
    // unreachable for a size byte <= 255, kept as a decode failure anyway
    .map_err(|_| FrameError::SizeMismatch {
        declared,
        actual: frame.len(),
    })?;
    Ok(envelope)
}

/// Parse a `tmsg 0x.. 0x..` host line into frame bytes.
///
/// Tokens may be written with or without the `0x` prefix.
pub fn parse_host_frame(line: &str) -> Result<Vec<u8>, FrameError> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some(word) if word.eq_ignore_ascii_case(HOST_FRAME_PREFIX) => {}
        _ => return Err(FrameError::NotAFrame),
    }
    tokens
        .map(|tok| {
            let digits = tok
                .strip_prefix("0x")
                .or_else(|| tok.strip_prefix("0X"))
                .unwrap_or(tok);
            u8::from_str_radix(digits, 16).map_err(|_| FrameError::BadHexToken(tok.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_dimmer_host_frame() {
        let bytes = parse_host_frame("tmsg 0x07 0x71 0x0D 0x41 0x19 0x06 0xD0").unwrap();
        let env = decode(&bytes).unwrap();
        assert_eq!(env.pid(), MessageKind::Dimmer);
        assert_eq!(env.source_id(), NodeId(0x41));
        assert_eq!(env.dest_id(), NodeId(0x19));
        assert!(!env.is_broadcast());
        assert_eq!(env.payload(), &[0x06u8, 0xD0]);
        assert_eq!(encode(&env), bytes);
    }

    #[test]
    fn rejects_size_mismatch() {
        let err = decode(&[0x09, 0x71, 0x0D, 0x41, 0x19, 0x06]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                declared: 9,
                actual: 6
            }
        );
    }

    #[test]
    fn rejects_short_frames() {
        assert_eq!(
            decode(&[0x03, 0x80, 0x05]).unwrap_err(),
            FrameError::TooShort { len: 3 }
        );
    }

    #[test]
    fn host_frame_requires_prefix_and_hex() {
        assert_eq!(parse_host_frame("ping").unwrap_err(), FrameError::NotAFrame);
        assert_eq!(
            parse_host_frame("tmsg 0x07 zz").unwrap_err(),
            FrameError::BadHexToken("zz".into())
        );
        assert_eq!(parse_host_frame("TMSG 05 80").unwrap(), vec![0x05, 0x80]);
    }
}
