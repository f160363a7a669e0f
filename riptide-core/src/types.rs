use std::fmt;

/// Identifies a broadcaster channel across all external systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        ChannelId(id)
    }
}

/// Identifies a single broadcast session, minted by the service when the
/// stream starts. Opaque to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId(id)
    }
}

/// Shared secret between a broadcaster and the service. Used verbatim as the
/// HMAC-SHA512 key during the FTL handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamKey(Vec<u8>);

impl StreamKey {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        StreamKey(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log key material.
        f.write_str("StreamKey(..)")
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        StreamKey(key.as_bytes().to_vec())
    }
}

/// Snapshot of everything the service wants to know about a running stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    pub audio_codec: String,
    pub ingest_server: String,
    pub ingest_viewers: u32,
    pub lost_packets: u64,
    pub nack_packets: u64,
    pub recv_packets: u64,
    pub source_bitrate: u64,
    pub source_ping: u64,
    pub stream_time_seconds: u64,
    pub vendor_name: String,
    pub vendor_version: String,
    pub video_codec: String,
    pub video_height: u32,
    pub video_width: u32,
}
