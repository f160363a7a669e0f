use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::control::metadata::MetadataUpdate;
use crate::errors::ControlError;
use crate::types::{ChannelId, StreamId, StreamMetadata};

/// How many keyframes the thumbnail channel buffers before producers start
/// dropping. Consumers always drain to the newest entry, so the depth is not
/// load-bearing.
const THUMBNAIL_BACKLOG: usize = 10;

/// A republished media track: what it carries and where packets go.
#[derive(Clone, Debug)]
pub struct StreamTrack {
    pub kind: RTPCodecType,
    pub codec: String,
    pub track: Arc<TrackLocalStaticRTP>,
}

/// Per-channel runtime state for one broadcast session.
///
/// Created by the control engine on `start_stream`, mutated by the ingest
/// protocol handler (tracks, counters, client metadata) and by the heartbeat
/// loop (decoded video dimensions), destroyed on `stop_stream`.
#[derive(Debug)]
pub struct Stream {
    channel_id: ChannelId,
    stream_id: OnceLock<StreamId>,

    state: Mutex<StreamState>,
    stopped: AtomicBool,
    cancel: CancellationToken,

    thumbnail_sender: mpsc::Sender<Bytes>,
    thumbnail_receiver: Mutex<mpsc::Receiver<Bytes>>,

    start_time: u64,
}

#[derive(Default, Debug)]
struct StreamState {
    tracks: Vec<StreamTrack>,

    audio_codec: String,
    video_codec: String,
    vendor_name: String,
    vendor_version: String,
    video_width: u32,
    video_height: u32,

    total_audio_packets: u64,
    total_video_packets: u64,

    last_time: u64,
}

impl Stream {
    pub fn new(channel_id: ChannelId, cancel: CancellationToken) -> Self {
        let (thumbnail_sender, thumbnail_receiver) = mpsc::channel(THUMBNAIL_BACKLOG);
        Stream {
            channel_id,
            stream_id: OnceLock::new(),
            state: Mutex::new(StreamState::default()),
            stopped: AtomicBool::new(false),
            cancel,
            thumbnail_sender,
            thumbnail_receiver: Mutex::new(thumbnail_receiver),
            start_time: epoch_seconds(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Set once by the engine after the service has minted the id, before the
    /// first heartbeat tick. Later calls are ignored.
    pub(crate) fn set_stream_id(&self, stream_id: StreamId) {
        let _ = self.stream_id.set(stream_id);
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id.get().copied()
    }

    /// Append a track sink. The stream's codec name for that kind follows the
    /// track's codec.
    pub fn add_track(
        &self,
        kind: RTPCodecType,
        codec: &str,
        track: Arc<TrackLocalStaticRTP>,
    ) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        match kind {
            RTPCodecType::Audio => state.audio_codec = codec.to_string(),
            RTPCodecType::Video => state.video_codec = codec.to_string(),
            RTPCodecType::Unspecified => return Err(ControlError::InvalidTrack),
        }
        state.tracks.push(StreamTrack {
            kind,
            codec: codec.to_string(),
            track,
        });
        Ok(())
    }

    pub fn tracks(&self) -> Vec<StreamTrack> {
        self.state.lock().unwrap().tracks.clone()
    }

    /// Apply any number of metadata updates reported by the protocol handler.
    pub fn report_metadata(&self, updates: impl IntoIterator<Item = MetadataUpdate>) {
        let mut state = self.state.lock().unwrap();
        for update in updates {
            update.apply(&mut state);
        }
    }

    pub(crate) fn set_video_dimensions(&self, width: u32, height: u32) {
        let mut state = self.state.lock().unwrap();
        state.video_width = width;
        state.video_height = height;
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Idempotent transition to stopped; fires the stream's cancellation so
    /// every task owned by this stream winds down.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a freshly reassembled keyframe without blocking; dropped when the
    /// heartbeat is behind.
    pub fn push_thumbnail(&self, keyframe: Bytes) {
        if self.thumbnail_sender.try_send(keyframe).is_err() {
            trace!(channel_id = %self.channel_id, "thumbnail backlog full, dropping keyframe");
        }
    }

    /// Drain the thumbnail channel and keep only the newest keyframe.
    pub fn take_latest_thumbnail(&self) -> Option<Bytes> {
        let mut receiver = self.thumbnail_receiver.lock().unwrap();
        let mut latest = None;
        while let Ok(keyframe) = receiver.try_recv() {
            latest = Some(keyframe);
        }
        latest
    }

    /// Compose the service-facing metadata snapshot and stamp `last_time`.
    pub fn metadata_snapshot(&self, ingest_server: &str) -> StreamMetadata {
        let now = epoch_seconds();
        let mut state = self.state.lock().unwrap();
        state.last_time = now;
        StreamMetadata {
            audio_codec: state.audio_codec.clone(),
            ingest_server: ingest_server.to_string(),
            ingest_viewers: 0,
            lost_packets: 0,
            nack_packets: 0,
            recv_packets: state.total_audio_packets + state.total_video_packets,
            source_bitrate: 0,
            source_ping: 0,
            stream_time_seconds: now.saturating_sub(self.start_time),
            vendor_name: state.vendor_name.clone(),
            vendor_version: state.vendor_version.clone(),
            video_codec: state.video_codec.clone(),
            video_height: state.video_height,
            video_width: state.video_width,
        }
    }

    pub fn total_audio_packets(&self) -> u64 {
        self.state.lock().unwrap().total_audio_packets
    }

    pub fn total_video_packets(&self) -> u64 {
        self.state.lock().unwrap().total_video_packets
    }
}

impl MetadataUpdate {
    fn apply(self, state: &mut StreamState) {
        match self {
            MetadataUpdate::AudioPackets(count) => state.total_audio_packets += count,
            MetadataUpdate::VideoPackets(count) => state.total_video_packets += count,
            MetadataUpdate::AudioCodec(codec) => state.audio_codec = codec,
            MetadataUpdate::VideoCodec(codec) => state.video_codec = codec,
            MetadataUpdate::VendorName(name) => state.vendor_name = name,
            MetadataUpdate::VendorVersion(version) => state.vendor_version = version,
            MetadataUpdate::VideoWidth(width) => state.video_width = width,
            MetadataUpdate::VideoHeight(height) => state.video_height = height,
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
