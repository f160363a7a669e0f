use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::control::Service;
use crate::errors::ServiceError;
use crate::types::{ChannelId, StreamId, StreamKey, StreamMetadata};

/// Development backend: every channel exists, keys are derived from the
/// channel id, and all reporting succeeds.
#[derive(Debug, Default)]
pub struct DummyService;

impl DummyService {
    pub fn new() -> Self {
        DummyService
    }
}

#[async_trait]
impl Service for DummyService {
    fn name(&self) -> &'static str {
        "Dummy Service"
    }

    async fn connect(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// The key is the lowercase hex SHA-256 of the channel id's decimal form,
    /// so broadcast tooling can derive it without a database.
    async fn get_hmac_key(&self, channel_id: ChannelId) -> Result<StreamKey, ServiceError> {
        let digest = Sha256::digest(channel_id.to_string().as_bytes());
        let key = hex::encode(digest);
        debug!(%channel_id, key, "derived dummy stream key");
        Ok(StreamKey::new(key.into_bytes()))
    }

    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError> {
        Ok(StreamId(channel_id.0 + 1))
    }

    async fn end_stream(&self, _stream_id: StreamId) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn update_stream_metadata(
        &self,
        stream_id: StreamId,
        metadata: StreamMetadata,
    ) -> Result<(), ServiceError> {
        debug!(%stream_id, ?metadata, "dummy metadata update");
        Ok(())
    }

    async fn send_jpeg_preview(
        &self,
        stream_id: StreamId,
        image: Vec<u8>,
    ) -> Result<(), ServiceError> {
        debug!(%stream_id, bytes = image.len(), "dummy preview image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keys_are_stable_per_channel() {
        let service = DummyService::new();
        let first = service.get_hmac_key(ChannelId(42)).await.unwrap();
        let second = service.get_hmac_key(ChannelId(42)).await.unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), 64);

        let other = service.get_hmac_key(ChannelId(43)).await.unwrap();
        assert_ne!(first.as_bytes(), other.as_bytes());
    }

    #[tokio::test]
    async fn stream_ids_are_derived_from_the_channel() {
        let service = DummyService::new();
        let stream_id = service.start_stream(ChannelId(42)).await.unwrap();
        assert_eq!(stream_id, StreamId(43));
    }
}
