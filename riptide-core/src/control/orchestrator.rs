use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::types::{ChannelId, StreamId};

/// The external edge-routing control plane: told where a channel's live
/// endpoint currently resides.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<(), OrchestratorError>;

    async fn close(&self) -> Result<(), OrchestratorError>;

    async fn start_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), OrchestratorError>;

    async fn stop_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), OrchestratorError>;

    async fn heartbeat(&self, channel_id: ChannelId) -> Result<(), OrchestratorError>;
}
