//! # Mesh Envelope Model
//!
//! Types describing a single addressed message on the mesh link, plus the
//! gateway facade used by the rest of the node to talk to the radio
//! collaborator.
//!
//! ## Wire layout
//!
//! Envelopes travel as compact binary frames (see [`frame`]):
//!
//! ```text
//! [size][control][pid][src][dst][payload ...]
//! ```
//!
//! `control` carries the addressing mode: bit `0x80` marks a broadcast and
//! bit `0x08` marks a response to an earlier request. The remaining bits
//! (request/ack flags, hop budget) are owned by the radio collaborator and
//! passed through untouched.
//!
//! ## Ownership
//!
//! An envelope is created by the radio collaborator on receive and is only
//! borrowed while it is being handled; nothing in the node keeps one past the
//! handling call.

pub mod frame;
pub mod gateway;

pub use gateway::{InboundSink, LoopbackRadio, MeshGateway, MeshRadio, SendCompletion};

use std::fmt;

/// Largest payload a single frame can carry (size byte minus the header).
pub const MAX_PAYLOAD_LEN: usize = 255 - frame::HEADER_LEN;

/// Errors raised by the mesh facade and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("payload too long ({len} bytes, maximum {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("radio rejected transmit: {0}")]
    Radio(String),

    #[error(transparent)]
    Frame(#[from] frame::FrameError),
}

/// Short mesh address of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u8);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message kind (protocol id) carried in the `pid` byte.
///
/// Equality and hashing go by the pid byte, so `Other(0x0C)` equals
/// `ExecuteCommand`. Envelopes store the named variant whenever one exists.
#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    Ping,
    Reset,
    Alive,
    Bme,
    Light,
    Battery,
    Heat,
    ExecuteCommand,
    Dimmer,
    Text,
    Other(u8),
}

impl MessageKind {
    pub fn from_pid(pid: u8) -> Self {
        match pid {
            0x01 => MessageKind::Ping,
            0x04 => MessageKind::Reset,
            0x05 => MessageKind::Alive,
            0x06 => MessageKind::Bme,
            0x07 => MessageKind::Light,
            0x08 => MessageKind::Battery,
            0x09 => MessageKind::Heat,
            0x0C => MessageKind::ExecuteCommand,
            0x0D => MessageKind::Dimmer,
            0x0E => MessageKind::Text,
            other => MessageKind::Other(other),
        }
    }

    pub fn pid(&self) -> u8 {
        match self {
            MessageKind::Ping => 0x01,
            MessageKind::Reset => 0x04,
            MessageKind::Alive => 0x05,
            MessageKind::Bme => 0x06,
            MessageKind::Light => 0x07,
            MessageKind::Battery => 0x08,
            MessageKind::Heat => 0x09,
            MessageKind::ExecuteCommand => 0x0C,
            MessageKind::Dimmer => 0x0D,
            MessageKind::Text => 0x0E,
            MessageKind::Other(pid) => *pid,
        }
    }

    /// Same kind with a known pid mapped to its named variant.
    pub fn normalized(self) -> Self {
        Self::from_pid(self.pid())
    }

    /// Label used in rendered serial lines.
    pub fn label(&self) -> String {
        match self {
            MessageKind::Ping => "ping".into(),
            MessageKind::Reset => "reset".into(),
            MessageKind::Alive => "alive".into(),
            MessageKind::Bme => "bme".into(),
            MessageKind::Light => "light".into(),
            MessageKind::Battery => "battery".into(),
            MessageKind::Heat => "heat".into(),
            MessageKind::ExecuteCommand => "cmd".into(),
            MessageKind::Dimmer => "dimmer".into(),
            MessageKind::Text => "text".into(),
            MessageKind::Other(pid) => format!("pid{:02x}", pid),
        }
    }
}

impl PartialEq for MessageKind {
    fn eq(&self, other: &Self) -> bool {
        self.pid() == other.pid()
    }
}

impl Eq for MessageKind {}

impl std::hash::Hash for MessageKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pid().hash(state);
    }
}

/// Addressing flags decoded from the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Control {
    pub is_broadcast: bool,
    pub is_response: bool,
    /// Bits the node does not interpret (hop budget etc.), kept for re-encoding.
    pub extra: u8,
}

impl Control {
    pub const BROADCAST: u8 = 0x80;
    pub const RESPONSE: u8 = 0x08;

    pub fn from_byte(b: u8) -> Self {
        Control {
            is_broadcast: b & Self::BROADCAST != 0,
            is_response: b & Self::RESPONSE != 0,
            extra: b & !(Self::BROADCAST | Self::RESPONSE),
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut b = self.extra & !(Self::BROADCAST | Self::RESPONSE);
        if self.is_broadcast {
            b |= Self::BROADCAST;
        }
        if self.is_response {
            b |= Self::RESPONSE;
        }
        b
    }

    pub fn broadcast() -> Self {
        Control {
            is_broadcast: true,
            ..Default::default()
        }
    }

    pub fn unicast() -> Self {
        Control::default()
    }

    pub fn response() -> Self {
        Control {
            is_response: true,
            ..Default::default()
        }
    }
}

/// One addressed message unit on the mesh link. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshEnvelope {
    source_id: NodeId,
    dest_id: NodeId,
    control: Control,
    pid: MessageKind,
    payload: Vec<u8>,
}

impl MeshEnvelope {
    pub fn new(
        source_id: NodeId,
        dest_id: NodeId,
        control: Control,
        pid: MessageKind,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, MeshError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MeshError::PayloadTooLong {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(MeshEnvelope {
            source_id,
            dest_id,
            control,
            pid: pid.normalized(),
            payload,
        })
    }

    /// Broadcast from `source`; the destination byte is left at 0.
    pub fn broadcast(
        source: NodeId,
        pid: MessageKind,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, MeshError> {
        Self::new(source, NodeId(0), Control::broadcast(), pid, payload)
    }

    pub fn source_id(&self) -> NodeId {
        self.source_id
    }
    pub fn dest_id(&self) -> NodeId {
        self.dest_id
    }
    pub fn control(&self) -> Control {
        self.control
    }
    pub fn is_broadcast(&self) -> bool {
        self.control.is_broadcast
    }
    pub fn is_response(&self) -> bool {
        self.control.is_response
    }
    pub fn pid(&self) -> MessageKind {
        self.pid
    }
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }
}
