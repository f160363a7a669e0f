//! The control plane: one registry of active streams, the collaborators that
//! must hear about them, and the per-stream upkeep loops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::ControlError;
use crate::types::{ChannelId, StreamKey};

mod heartbeat;
pub mod keyframer;
mod metadata;
mod orchestrator;
mod service;
mod stream;
mod thumbnailer;

pub use keyframer::Keyframer;
pub use metadata::MetadataUpdate;
pub use orchestrator::Orchestrator;
pub use service::Service;
pub use stream::{Stream, StreamTrack};

#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Reported to the service as the ingest server name.
    pub hostname: String,
    /// Base URL of this server's own WHEP endpoint, used by the thumbnail
    /// loopback (e.g. `http://127.0.0.1:8091/whep/endpoint`). Without one,
    /// streams run without thumbnails.
    pub whep_endpoint: Option<String>,
}

/// Owns the `{ChannelId -> Stream}` registry and coordinates the service and
/// orchestrator around each stream's lifecycle.
pub struct Control {
    service: Arc<dyn Service>,
    orchestrator: Arc<dyn Orchestrator>,
    streams: Mutex<HashMap<ChannelId, Arc<Stream>>>,
    cancel: CancellationToken,

    hostname: String,
    whep_endpoint: Option<String>,
}

impl Control {
    pub fn new(
        service: Arc<dyn Service>,
        orchestrator: Arc<dyn Orchestrator>,
        options: ControlOptions,
    ) -> Arc<Control> {
        Arc::new(Control {
            service,
            orchestrator,
            streams: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            hostname: options.hostname,
            whep_endpoint: options.whep_endpoint,
        })
    }

    /// Bring up the collaborator connections. Fatal at boot when either side
    /// is unreachable.
    pub async fn connect(&self) -> Result<(), ControlError> {
        self.service
            .connect()
            .await
            .map_err(ControlError::Service)?;
        self.orchestrator
            .connect()
            .await
            .map_err(ControlError::Orchestrator)?;
        info!(
            service = self.service.name(),
            orchestrator = self.orchestrator.name(),
            "control engine connected"
        );
        Ok(())
    }

    /// Root cancellation: fires once on operator shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check a plaintext stream key against the service's copy.
    pub async fn authenticate(
        &self,
        channel_id: ChannelId,
        stream_key: &StreamKey,
    ) -> Result<(), ControlError> {
        let actual = self.service.get_hmac_key(channel_id).await?;
        if stream_key != &actual {
            return Err(ControlError::Unauthenticated);
        }
        Ok(())
    }

    pub async fn get_hmac_key(&self, channel_id: ChannelId) -> Result<StreamKey, ControlError> {
        Ok(self.service.get_hmac_key(channel_id).await?)
    }

    /// Allocate the channel's stream, announce it to the service and the
    /// orchestrator, and start its upkeep tasks.
    ///
    /// All-or-nothing: when a collaborator refuses, the partially started
    /// stream is torn down before the error is returned.
    pub async fn start_stream(
        self: &Arc<Self>,
        channel_id: ChannelId,
    ) -> Result<Arc<Stream>, ControlError> {
        let stream = {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(&channel_id) {
                return Err(ControlError::AlreadyExists(channel_id));
            }
            let stream = Arc::new(Stream::new(channel_id, self.cancel.child_token()));
            streams.insert(channel_id, stream.clone());
            stream
        };

        info!(%channel_id, "starting stream");

        let stream_id = match self.service.start_stream(channel_id).await {
            Ok(stream_id) => stream_id,
            Err(err) => {
                let _ = self.remove_stream(channel_id);
                return Err(ControlError::Service(err));
            }
        };
        stream.set_stream_id(stream_id);

        if let Err(err) = self.orchestrator.start_stream(channel_id, stream_id).await {
            let _ = self.stop_stream(channel_id).await;
            return Err(ControlError::Orchestrator(err));
        }

        tokio::spawn(self.clone().run_heartbeat(stream.clone()));
        if let Some(endpoint) = &self.whep_endpoint {
            tokio::spawn(thumbnailer::run(stream.clone(), endpoint.clone()));
        }

        Ok(stream)
    }

    /// Stop a stream and tell everyone. Idempotent: an unknown channel is
    /// already stopped.
    ///
    /// Every collaborator is informed even when an earlier one fails; the
    /// first error in (service, orchestrator, registry) order is returned.
    pub async fn stop_stream(&self, channel_id: ChannelId) -> Result<(), ControlError> {
        debug!(%channel_id, "stop stream");
        let Some(stream) = self.get_stream(channel_id) else {
            return Ok(());
        };

        if !stream.stopped() {
            stream.stop();
        }

        let service_result = match stream.stream_id() {
            Some(stream_id) => self
                .service
                .end_stream(stream_id)
                .await
                .map_err(ControlError::Service),
            None => Ok(()),
        };
        let orchestrator_result = match stream.stream_id() {
            Some(stream_id) => self
                .orchestrator
                .stop_stream(channel_id, stream_id)
                .await
                .map_err(ControlError::Orchestrator),
            None => Ok(()),
        };
        let registry_result = self.remove_stream(channel_id);

        if let Err(err) = &service_result {
            error!(%channel_id, %err, "service end_stream failed");
        }
        if let Err(err) = &orchestrator_result {
            error!(%channel_id, %err, "orchestrator stop_stream failed");
        }

        service_result?;
        orchestrator_result?;
        registry_result
    }

    /// Snapshot of a stream's republished tracks.
    pub fn get_tracks(&self, channel_id: ChannelId) -> Result<Vec<StreamTrack>, ControlError> {
        let stream = self
            .get_stream(channel_id)
            .ok_or(ControlError::NotFound(channel_id))?;
        Ok(stream.tracks())
    }

    pub fn get_stream(&self, channel_id: ChannelId) -> Option<Arc<Stream>> {
        self.streams.lock().unwrap().get(&channel_id).cloned()
    }

    /// Stop every active stream and fire the root cancellation.
    pub async fn shutdown(&self) {
        let channels: Vec<ChannelId> = self.streams.lock().unwrap().keys().copied().collect();
        for channel_id in channels {
            if let Err(err) = self.stop_stream(channel_id).await {
                error!(%channel_id, %err, "failed to stop stream during shutdown");
            }
        }
        if let Err(err) = self.orchestrator.close().await {
            error!(%err, "failed to close orchestrator connection");
        }
        self.cancel.cancel();
    }

    fn remove_stream(&self, channel_id: ChannelId) -> Result<(), ControlError> {
        match self.streams.lock().unwrap().remove(&channel_id) {
            Some(_) => Ok(()),
            None => Err(ControlError::NotFound(channel_id)),
        }
    }
}
