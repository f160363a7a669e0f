use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::control::Orchestrator;
use crate::errors::OrchestratorError;
use crate::types::{ChannelId, StreamId};

/// Development backend that accepts every request.
#[derive(Debug, Default)]
pub struct DummyOrchestrator {
    connected: AtomicBool,
}

impl DummyOrchestrator {
    pub fn new() -> Self {
        DummyOrchestrator::default()
    }
}

#[async_trait]
impl Orchestrator for DummyOrchestrator {
    fn name(&self) -> &'static str {
        "Dummy Orchestrator"
    }

    async fn connect(&self) -> Result<(), OrchestratorError> {
        info!("Connecting to Dummy Orchestrator");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Closing connection to Dummy Orchestrator");
        }
        Ok(())
    }

    async fn start_stream(
        &self,
        _channel_id: ChannelId,
        _stream_id: StreamId,
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn stop_stream(
        &self,
        _channel_id: ChannelId,
        _stream_id: StreamId,
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn heartbeat(&self, _channel_id: ChannelId) -> Result<(), OrchestratorError> {
        Ok(())
    }
}
