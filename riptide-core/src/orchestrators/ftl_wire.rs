//! Wire codec for the FTL orchestrator control protocol.
//!
//! Every message is a 4-byte header followed by a variable payload. All
//! fixed-width fields are little-endian; strings are inline UTF-8, with the
//! length either carried in a preceding u16 or implied by the remainder of
//! the payload.
//!
//! ```text
//! |-                       32 bit / 4 byte                       -|
//! +---------------------------------------------------------------+
//! |  Msg Desc (8)  |   Msg Id (8)   |     Payload Length (16)     |
//! +---------------------------------------------------------------+
//! ```
//!
//! Bit 7 of the descriptor is set for responses, bit 6 for failures; the low
//! six bits carry the message type.

use crate::types::{ChannelId, StreamId};

pub const TYPE_INTRO: u8 = 0;
pub const TYPE_OUTRO: u8 = 1;
pub const TYPE_NODE_STATE: u8 = 2;
pub const TYPE_CHANNEL_SUBSCRIPTION: u8 = 16;
pub const TYPE_STREAM_PUBLISHING: u8 = 17;
pub const TYPE_STREAM_RELAYING: u8 = 20;

pub const HEADER_LEN: usize = 4;

const DESC_RESPONSE: u8 = 0b1000_0000;
const DESC_FAILURE: u8 = 0b0100_0000;
const DESC_TYPE_MASK: u8 = 0b0011_1111;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,

    #[error("string field is not valid utf-8")]
    InvalidString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub request: bool,
    pub success: bool,
    pub msg_type: u8,
    pub id: u8,
    pub payload_length: u16,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut desc = self.msg_type & DESC_TYPE_MASK;
        if !self.request {
            desc |= DESC_RESPONSE;
        }
        if !self.success {
            desc |= DESC_FAILURE;
        }
        let len = self.payload_length.to_le_bytes();
        [desc, self.id, len[0], len[1]]
    }

    pub fn decode(buf: &[u8]) -> Result<MessageHeader, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated);
        }
        Ok(MessageHeader {
            request: buf[0] & DESC_RESPONSE == 0,
            success: buf[0] & DESC_FAILURE == 0,
            msg_type: buf[0] & DESC_TYPE_MASK,
            id: buf[1],
            payload_length: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }
}

/// Sent on connect with identifying information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroMessage {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_revision: u8,
    pub relay_layer: u8,
    pub region_code: String,
    pub hostname: String,
}

impl IntroMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![
            self.version_major,
            self.version_minor,
            self.version_revision,
            self.relay_layer,
        ];
        buf.extend_from_slice(&(self.region_code.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.region_code.as_bytes());
        buf.extend_from_slice(self.hostname.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<IntroMessage, WireError> {
        if buf.len() < 6 {
            return Err(WireError::Truncated);
        }
        let region_end = 6 + u16::from_le_bytes([buf[4], buf[5]]) as usize;
        if buf.len() < region_end {
            return Err(WireError::Truncated);
        }
        Ok(IntroMessage {
            version_major: buf[0],
            version_minor: buf[1],
            version_revision: buf[2],
            relay_layer: buf[3],
            region_code: decode_string(&buf[6..region_end])?,
            hostname: decode_string(&buf[region_end..])?,
        })
    }
}

/// Sent on disconnect with the reason for disconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutroMessage {
    pub reason: String,
}

impl OutroMessage {
    pub fn encode(&self) -> Vec<u8> {
        self.reason.as_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<OutroMessage, WireError> {
        Ok(OutroMessage {
            reason: decode_string(buf)?,
        })
    }
}

/// Sent periodically by nodes to indicate their current load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStateMessage {
    pub current_load: u32,
    pub maximum_load: u32,
}

impl NodeStateMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.current_load.to_le_bytes());
        buf.extend_from_slice(&self.maximum_load.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<NodeStateMessage, WireError> {
        if buf.len() < 8 {
            return Err(WireError::Truncated);
        }
        Ok(NodeStateMessage {
            current_load: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            maximum_load: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

/// Indicates whether streams for a given channel should be relayed to this
/// node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscriptionMessage {
    pub context: u8,
    pub channel_id: ChannelId,
    pub stream_key: String,
}

impl ChannelSubscriptionMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.context];
        buf.extend_from_slice(&self.channel_id.0.to_le_bytes());
        buf.extend_from_slice(self.stream_key.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<ChannelSubscriptionMessage, WireError> {
        if buf.len() < 5 {
            return Err(WireError::Truncated);
        }
        Ok(ChannelSubscriptionMessage {
            context: buf[0],
            channel_id: ChannelId(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]])),
            stream_key: decode_string(&buf[5..])?,
        })
    }
}

/// Indicates that a new stream is now available (or unavailable) from this
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPublishingMessage {
    pub context: u8,
    pub channel_id: ChannelId,
    pub stream_id: StreamId,
}

impl StreamPublishingMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.context];
        buf.extend_from_slice(&self.channel_id.0.to_le_bytes());
        buf.extend_from_slice(&self.stream_id.0.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<StreamPublishingMessage, WireError> {
        if buf.len() < 9 {
            return Err(WireError::Truncated);
        }
        Ok(StreamPublishingMessage {
            context: buf[0],
            channel_id: ChannelId(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]])),
            stream_id: StreamId(u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]])),
        })
    }
}

/// Contains the information used for relaying streams between nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRelayingMessage {
    pub context: u8,
    pub channel_id: ChannelId,
    pub stream_id: StreamId,
    pub target_hostname: String,
    pub stream_key: Vec<u8>,
}

impl StreamRelayingMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.context];
        buf.extend_from_slice(&self.channel_id.0.to_le_bytes());
        buf.extend_from_slice(&self.stream_id.0.to_le_bytes());
        buf.extend_from_slice(&(self.target_hostname.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.target_hostname.as_bytes());
        buf.extend_from_slice(&self.stream_key);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<StreamRelayingMessage, WireError> {
        if buf.len() < 11 {
            return Err(WireError::Truncated);
        }
        let hostname_end = 11 + u16::from_le_bytes([buf[9], buf[10]]) as usize;
        if buf.len() < hostname_end {
            return Err(WireError::Truncated);
        }
        Ok(StreamRelayingMessage {
            context: buf[0],
            channel_id: ChannelId(u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]])),
            stream_id: StreamId(u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]])),
            target_hostname: decode_string(&buf[11..hostname_end])?,
            stream_key: buf[hostname_end..].to_vec(),
        })
    }
}

fn decode_string(buf: &[u8]) -> Result<String, WireError> {
    String::from_utf8(buf.to_vec()).map_err(|_| WireError::InvalidString)
}
