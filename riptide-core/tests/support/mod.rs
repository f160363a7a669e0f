#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use riptide_core::control::{Control, ControlOptions, Orchestrator, Service};
use riptide_core::errors::{OrchestratorError, ServiceError};
use riptide_core::types::{ChannelId, StreamId, StreamKey, StreamMetadata};

/// Everything the mock collaborators were asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ServiceStartStream(u32),
    ServiceEndStream(u32),
    ServiceUpdateMetadata(u32),
    ServiceSendPreview(u32),
    OrchestratorStartStream(u32, u32),
    OrchestratorStopStream(u32, u32),
    OrchestratorHeartbeat(u32),
}

/// Shared state behind [`MockService`] and [`MockOrchestrator`]: a call log
/// plus switches that make individual operations fail.
pub struct MockBackend {
    pub stream_key: Mutex<String>,
    calls: Mutex<Vec<Call>>,

    pub fail_service_start: AtomicBool,
    pub fail_service_end: AtomicBool,
    pub fail_metadata: AtomicBool,
    pub fail_orchestrator_start: AtomicBool,
    pub fail_orchestrator_stop: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<MockBackend> {
        Arc::new(MockBackend {
            stream_key: Mutex::new("abcd".to_string()),
            calls: Mutex::new(Vec::new()),
            fail_service_start: AtomicBool::new(false),
            fail_service_end: AtomicBool::new(false),
            fail_metadata: AtomicBool::new(false),
            fail_orchestrator_start: AtomicBool::new(false),
            fail_orchestrator_stop: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_call(&self, call: &Call) -> bool {
        self.calls().contains(call)
    }

    pub fn count_calls(&self, matcher: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matcher(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn new_control(backend: &Arc<MockBackend>) -> Arc<Control> {
    Control::new(
        Arc::new(MockService(backend.clone())),
        Arc::new(MockOrchestrator(backend.clone())),
        ControlOptions {
            hostname: "ingest-test".to_string(),
            whep_endpoint: None,
        },
    )
}

pub struct MockService(pub Arc<MockBackend>);

#[async_trait]
impl Service for MockService {
    fn name(&self) -> &'static str {
        "Mock Service"
    }

    async fn connect(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn get_hmac_key(&self, _channel_id: ChannelId) -> Result<StreamKey, ServiceError> {
        Ok(StreamKey::from(self.0.stream_key.lock().unwrap().as_str()))
    }

    async fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId, ServiceError> {
        self.0.record(Call::ServiceStartStream(channel_id.0));
        if self.0.fail_service_start.load(Ordering::SeqCst) {
            return Err(ServiceError::Denied("start refused".to_string()));
        }
        Ok(StreamId(channel_id.0 + 1))
    }

    async fn end_stream(&self, stream_id: StreamId) -> Result<(), ServiceError> {
        self.0.record(Call::ServiceEndStream(stream_id.0));
        if self.0.fail_service_end.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("end failed".to_string()));
        }
        Ok(())
    }

    async fn update_stream_metadata(
        &self,
        stream_id: StreamId,
        _metadata: StreamMetadata,
    ) -> Result<(), ServiceError> {
        self.0.record(Call::ServiceUpdateMetadata(stream_id.0));
        if self.0.fail_metadata.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("metadata failed".to_string()));
        }
        Ok(())
    }

    async fn send_jpeg_preview(
        &self,
        stream_id: StreamId,
        _image: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.0.record(Call::ServiceSendPreview(stream_id.0));
        Ok(())
    }
}

pub struct MockOrchestrator(pub Arc<MockBackend>);

#[async_trait]
impl Orchestrator for MockOrchestrator {
    fn name(&self) -> &'static str {
        "Mock Orchestrator"
    }

    async fn connect(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn start_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), OrchestratorError> {
        self.0
            .record(Call::OrchestratorStartStream(channel_id.0, stream_id.0));
        if self.0.fail_orchestrator_start.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Denied("start refused".to_string()));
        }
        Ok(())
    }

    async fn stop_stream(
        &self,
        channel_id: ChannelId,
        stream_id: StreamId,
    ) -> Result<(), OrchestratorError> {
        self.0
            .record(Call::OrchestratorStopStream(channel_id.0, stream_id.0));
        if self.0.fail_orchestrator_stop.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Unavailable("stop failed".to_string()));
        }
        Ok(())
    }

    async fn heartbeat(&self, channel_id: ChannelId) -> Result<(), OrchestratorError> {
        self.0.record(Call::OrchestratorHeartbeat(channel_id.0));
        Ok(())
    }
}
