use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error};
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::control::{Control, MetadataUpdate, Stream};
use crate::protocols::ftl::error::FtlError;
use crate::protocols::ftl::server::{ConnectionHandler, ConnectionMetadata};
use crate::types::{ChannelId, StreamKey};

/// Bridges one FTL connection to the control engine: allocates the stream on
/// CONNECT, owns the republished WebRTC track sinks, and forwards media.
pub struct IngestHandler {
    control: Arc<Control>,
    session: Mutex<Option<Session>>,
}

#[derive(Clone)]
struct Session {
    channel_id: ChannelId,
    stream: Arc<Stream>,
    video_track: Arc<TrackLocalStaticRTP>,
    audio_track: Arc<TrackLocalStaticRTP>,
}

impl IngestHandler {
    pub fn new(control: Arc<Control>) -> Self {
        IngestHandler {
            control,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionHandler for IngestHandler {
    async fn hmac_key(&self) -> Result<StreamKey, FtlError> {
        let session = self.session().ok_or(FtlError::ConnectBeforeAuth)?;
        Ok(self.control.get_hmac_key(session.channel_id).await?)
    }

    async fn on_connect(&self, channel_id: ChannelId) -> Result<(), FtlError> {
        let stream = self.control.start_stream(channel_id).await?;

        let video_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_string(),
            "riptide".to_string(),
        ));
        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "riptide".to_string(),
        ));

        stream.add_track(RTPCodecType::Video, MIME_TYPE_H264, video_track.clone())?;
        stream.add_track(RTPCodecType::Audio, MIME_TYPE_OPUS, audio_track.clone())?;
        stream.report_metadata([
            MetadataUpdate::AudioCodec(MIME_TYPE_OPUS.to_string()),
            MetadataUpdate::VideoCodec(MIME_TYPE_H264.to_string()),
        ]);

        *self.session.lock().unwrap() = Some(Session {
            channel_id,
            stream,
            video_track,
            audio_track,
        });
        Ok(())
    }

    async fn on_play(&self, metadata: &ConnectionMetadata) -> Result<(), FtlError> {
        let session = self.session().ok_or(FtlError::ConnectBeforeAuth)?;
        session.stream.report_metadata([
            MetadataUpdate::VendorName(metadata.vendor_name.clone()),
            MetadataUpdate::VendorVersion(metadata.vendor_version.clone()),
            MetadataUpdate::VideoWidth(metadata.video_width),
            MetadataUpdate::VideoHeight(metadata.video_height),
        ]);
        Ok(())
    }

    async fn on_video(&self, packet: Packet) -> Result<(), FtlError> {
        let Some(session) = self.session() else {
            return Err(FtlError::Closed);
        };
        if session.stream.stopped() {
            return Err(FtlError::Closed);
        }

        if let Err(err) = session.video_track.write_rtp(&packet).await {
            debug!(%err, "dropping video packet");
        }
        session
            .stream
            .report_metadata([MetadataUpdate::VideoPackets(1)]);
        Ok(())
    }

    async fn on_audio(&self, packet: Packet) -> Result<(), FtlError> {
        let Some(session) = self.session() else {
            return Err(FtlError::Closed);
        };
        if session.stream.stopped() {
            return Err(FtlError::Closed);
        }

        if let Err(err) = session.audio_track.write_rtp(&packet).await {
            debug!(%err, "dropping audio packet");
        }
        session
            .stream
            .report_metadata([MetadataUpdate::AudioPackets(1)]);
        Ok(())
    }

    async fn is_active(&self) -> bool {
        match self.session() {
            Some(session) => !session.stream.stopped(),
            None => true,
        }
    }

    async fn on_close(&self) {
        let Some(session) = self.session.lock().unwrap().take() else {
            return;
        };
        if self.control.is_shutting_down() {
            return;
        }
        if let Err(err) = self.control.stop_stream(session.channel_id).await {
            error!(channel_id = %session.channel_id, %err, "failed to stop stream on close");
        }
    }
}
