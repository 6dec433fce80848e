//! Outbound frame units.
//!
//! A [`Packet`] is a fully-formed application message handed to a
//! session's runner: a frame type, a payload (text or bytes, never both),
//! and a last-fragment flag on data frames. Packets are produced and
//! consumed by an external codec; this crate only constructs and forwards
//! them. Payloads are `Arc`-backed so a group fan-out shares one buffer
//! across every recipient's queue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Maximum control-frame (ping/pong/close) payload, per RFC 6455 §5.5.
pub const CONTROL_PAYLOAD_MAX: usize = 125;

/// Close code sent by a locally initiated `close()`.
pub const CLOSE_NORMAL: u16 = 1000;

/// Frame type of an application message unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// UTF-8 text data frame.
    Text,
    /// Binary data frame.
    Binary,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
    /// Close control frame.
    Close,
}

/// One outbound message unit.
///
/// Text and binary payloads are mutually exclusive by construction; the
/// `last` flag only exists on data frames (control frames are never
/// fragmented).
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Text data frame.
    Text {
        /// UTF-8 payload, shared across fan-out recipients.
        text: Arc<str>,
        /// True when this is the final fragment of the message.
        last: bool,
    },
    /// Binary data frame.
    Binary {
        /// Byte payload, shared across fan-out recipients.
        data: Arc<[u8]>,
        /// True when this is the final fragment of the message.
        last: bool,
    },
    /// Ping control frame.
    Ping {
        /// Optional application data echoed back in the pong.
        data: Arc<[u8]>,
    },
    /// Pong control frame.
    Pong {
        /// Application data from the ping being answered.
        data: Arc<[u8]>,
    },
    /// Close control frame.
    Close {
        /// Close status code.
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

impl Packet {
    /// Single (unfragmented) text message.
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Self::Text { text: text.into(), last: true }
    }

    /// Text fragment with an explicit last flag.
    pub fn text_fragment(text: impl Into<Arc<str>>, last: bool) -> Self {
        Self::Text { text: text.into(), last }
    }

    /// Single (unfragmented) binary message.
    pub fn binary(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Binary { data: data.into(), last: true }
    }

    /// Binary fragment with an explicit last flag.
    pub fn binary_fragment(data: impl Into<Arc<[u8]>>, last: bool) -> Self {
        Self::Binary { data: data.into(), last }
    }

    /// Ping with an empty payload (the default keepalive probe).
    pub fn ping() -> Self {
        Self::Ping { data: Arc::from(&[][..]) }
    }

    /// Ping carrying application data.
    pub fn ping_with(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Ping { data: data.into() }
    }

    /// Pong answering a ping.
    pub fn pong(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Pong { data: data.into() }
    }

    /// Close frame.
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close { code, reason: reason.into() }
    }

    /// Close frame for a locally initiated, normal close.
    pub fn close_normal() -> Self {
        Self::close(CLOSE_NORMAL, "")
    }

    /// Frame type of this packet.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Text { .. } => FrameType::Text,
            Self::Binary { .. } => FrameType::Binary,
            Self::Ping { .. } => FrameType::Ping,
            Self::Pong { .. } => FrameType::Pong,
            Self::Close { .. } => FrameType::Close,
        }
    }

    /// True for ping/pong/close frames.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping { .. } | Self::Pong { .. } | Self::Close { .. })
    }

    /// True when this frame completes a message (control frames always do).
    pub fn is_last(&self) -> bool {
        match self {
            Self::Text { last, .. } | Self::Binary { last, .. } => *last,
            _ => true,
        }
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text { text, .. } => text.len(),
            Self::Binary { data, .. } | Self::Ping { data } | Self::Pong { data } => data.len(),
            Self::Close { reason, .. } => reason.len() + 2,
        }
    }

    /// Whether the packet is well-formed for the wire. Control frames cap
    /// their payload at [`CONTROL_PAYLOAD_MAX`] bytes.
    pub fn is_valid(&self) -> bool {
        !self.is_control() || self.payload_len() <= CONTROL_PAYLOAD_MAX
    }

    /// Short human-readable summary for logging.
    pub fn summary(&self) -> String {
        match self {
            Self::Text { text, last } => format!("text[{};last={last}]", text.len()),
            Self::Binary { data, last } => format!("binary[{};last={last}]", data.len()),
            Self::Ping { data } => format!("ping[{}]", data.len()),
            Self::Pong { data } => format!("pong[{}]", data.len()),
            Self::Close { code, .. } => format!("close[{code}]"),
        }
    }
}

/// Payload of a group fan-out request: text or bytes, exclusive.
///
/// This is what crosses the node-service boundary; each receiving node
/// turns it into per-session [`Packet`]s.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// UTF-8 text.
    Text(Arc<str>),
    /// Raw bytes.
    Binary(Arc<[u8]>),
}

impl Payload {
    /// Build the per-session data packet for this payload.
    pub fn to_packet(&self, last: bool) -> Packet {
        match self {
            Self::Text(text) => Packet::Text { text: Arc::clone(text), last },
            Self::Binary(data) => Packet::Binary { data: Arc::clone(data), last },
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short human-readable summary for logging.
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => format!("text[{}]", text.len()),
            Self::Binary(data) => format!("binary[{}]", data.len()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(Arc::from(s))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(Arc::from(s))
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Self::Binary(Arc::from(b))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Arc::from(b))
    }
}
