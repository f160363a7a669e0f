use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::control::{Control, Stream};
use crate::errors::ControlError;
use crate::thumbnail;

pub(super) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEARTBEAT_FAILURE_LIMIT: u32 = 5;

impl Control {
    /// Per-stream upkeep: every 15 seconds push the newest thumbnail and a
    /// metadata snapshot to the service and ping the orchestrator.
    ///
    /// A tick with any failed step raises the failure count, a clean tick
    /// lowers it (floor zero); five accumulated failures stop the stream.
    pub(super) async fn run_heartbeat(self: Arc<Self>, stream: Arc<Stream>) {
        let channel_id = stream.channel_id();
        let cancel = stream.cancel_token();
        let mut tick_failed: u32 = 0;
        let mut ticker = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%channel_id, "heartbeat loop cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            info!(%channel_id, tick_failed, "collecting stream metadata");
            let mut has_errors = false;

            if let Err(err) = self.send_thumbnail(&stream).await {
                error!(%channel_id, %err, "error sending thumbnail");
                has_errors = true;
            }
            if let Err(err) = self.send_metadata(&stream).await {
                error!(%channel_id, %err, "error sending metadata");
                has_errors = true;
            }
            if let Err(err) = self.orchestrator.heartbeat(channel_id).await {
                error!(%channel_id, %err, "error sending orchestrator heartbeat");
                has_errors = true;
            }

            if has_errors {
                tick_failed += 1;
            } else {
                tick_failed = tick_failed.saturating_sub(1);
            }

            if tick_failed >= HEARTBEAT_FAILURE_LIMIT {
                warn!(%channel_id, "stopping stream due to excessive heartbeat errors");
                if let Err(err) = self.stop_stream(channel_id).await {
                    error!(%channel_id, %err, "failed to stop stream after heartbeat failures");
                }
                return;
            }
        }
    }

    /// Decode the newest queued keyframe to a JPEG preview and pass it to the
    /// service; an empty queue is not an error.
    async fn send_thumbnail(&self, stream: &Arc<Stream>) -> Result<(), ControlError> {
        let Some(keyframe) = stream.take_latest_thumbnail() else {
            return Ok(());
        };
        if keyframe.is_empty() {
            return Ok(());
        }
        let Some(stream_id) = stream.stream_id() else {
            return Ok(());
        };

        let thumbnail =
            tokio::task::spawn_blocking(move || thumbnail::keyframe_to_jpeg(&keyframe))
                .await
                .map_err(|err| ControlError::Internal(err.to_string()))??;

        self.service
            .send_jpeg_preview(stream_id, thumbnail.data)
            .await?;
        stream.set_video_dimensions(thumbnail.width, thumbnail.height);
        debug!(channel_id = %stream.channel_id(), "sent preview image");
        Ok(())
    }

    async fn send_metadata(&self, stream: &Arc<Stream>) -> Result<(), ControlError> {
        let Some(stream_id) = stream.stream_id() else {
            return Ok(());
        };
        let metadata = stream.metadata_snapshot(&self.hostname);
        Ok(self
            .service
            .update_stream_metadata(stream_id, metadata)
            .await?)
    }
}
