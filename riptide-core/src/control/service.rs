use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::types::{ChannelId, StreamId, StreamKey, StreamMetadata};

/// The external channel-and-user database: issues stream keys, mints stream
/// ids, and records liveness metadata and preview images.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name of the service, eg: Dummy.
    fn name(&self) -> &'static str;

    /// Connect to the service.
    async fn connect(&self) -> Result<(), ServiceError>;

    /// Get the private HMAC key for a given channel.
    async fn get_hmac_key(&self, channel_id: ChannelId) -> Result<StreamKey, ServiceError>;

    /// Start a stream for a given channel, returning its new stream id.
    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError>;

    /// Mark the given stream as ended on the service.
    async fn end_stream(&self, stream_id: StreamId) -> Result<(), ServiceError>;

    /// Update the service with additional metadata about a stream.
    async fn update_stream_metadata(
        &self,
        stream_id: StreamId,
        metadata: StreamMetadata,
    ) -> Result<(), ServiceError>;

    /// Send a JPEG preview image of a stream to the service.
    async fn send_jpeg_preview(
        &self,
        stream_id: StreamId,
        image: Vec<u8>,
    ) -> Result<(), ServiceError>;
}
