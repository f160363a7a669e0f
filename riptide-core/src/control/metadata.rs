/// A single mutation reported by a protocol handler via
/// [`Stream::report_metadata`](crate::control::Stream::report_metadata).
///
/// Packet-count variants increment; the rest overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    AudioPackets(u64),
    VideoPackets(u64),
    AudioCodec(String),
    VideoCodec(String),
    VendorName(String),
    VendorVersion(String),
    VideoWidth(u32),
    VideoHeight(u32),
}
