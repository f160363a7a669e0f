//! Thin wrappers around `RTCPeerConnection` for the two roles the engine
//! plays itself: receiving its own WHEP loopback (thumbnailer) and sending
//! republished tracks to WHEP subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::{
    OnPeerConnectionStateChangeHdlrFn, OnTrackHdlrFn, RTCPeerConnection,
};
use webrtc::track::track_local::TrackLocal;

async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let peer_connection = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await?,
    );
    peer_connection.on_ice_connection_state_change(Box::new(
        move |connection_state: RTCIceConnectionState| {
            debug!("ICE connection state has changed {connection_state}");
            Box::pin(async {})
        },
    ));
    Ok(peer_connection)
}

async fn wait_for_ice_candidates(pc: &RTCPeerConnection, wait_timeout: Duration) {
    let (sender, mut receiver) = watch::channel(RTCIceGathererState::Unspecified);

    pc.on_ice_gathering_state_change(Box::new(move |gatherer_state| {
        if let Err(err) = sender.send(gatherer_state) {
            debug!("cannot send gathering state: {err:?}");
        }
        Box::pin(async {})
    }));

    let gather_candidates = async {
        while receiver.changed().await.is_ok() {
            if *receiver.borrow() == RTCIceGathererState::Complete {
                break;
            }
        }
    };

    if timeout(wait_timeout, gather_candidates).await.is_err() {
        debug!("maximum time for gathering candidates has elapsed");
    }
}

/// Receive-only peer used by the thumbnail loopback.
#[derive(Clone)]
pub struct RecvonlyPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl RecvonlyPeerConnection {
    pub async fn new() -> Result<Self, webrtc::Error> {
        Ok(RecvonlyPeerConnection {
            pc: new_peer_connection().await?,
        })
    }

    pub fn on_track(&self, handler: OnTrackHdlrFn) {
        self.pc.on_track(handler);
    }

    pub async fn set_remote_description(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<(), webrtc::Error> {
        self.pc.set_remote_description(offer).await
    }

    pub async fn create_answer(&self) -> Result<RTCSessionDescription, webrtc::Error> {
        self.pc.create_answer(None).await
    }

    pub async fn set_local_description(
        &self,
        answer: RTCSessionDescription,
    ) -> Result<(), webrtc::Error> {
        self.pc.set_local_description(answer).await
    }

    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.pc.local_description().await
    }

    pub async fn wait_for_ice_candidates(&self, wait_timeout: Duration) {
        wait_for_ice_candidates(&self.pc, wait_timeout).await;
    }

    pub async fn close(&self) -> Result<(), webrtc::Error> {
        self.pc.close().await
    }
}

/// Send-only peer used by the WHEP output surface.
#[derive(Clone)]
pub struct SendonlyPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl SendonlyPeerConnection {
    pub async fn new() -> Result<Self, webrtc::Error> {
        Ok(SendonlyPeerConnection {
            pc: new_peer_connection().await?,
        })
    }

    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), webrtc::Error> {
        self.pc.add_track(track).await?;
        Ok(())
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn on_peer_connection_state_change(&self, handler: OnPeerConnectionStateChangeHdlrFn) {
        self.pc.on_peer_connection_state_change(handler);
    }

    pub async fn create_offer(&self) -> Result<RTCSessionDescription, webrtc::Error> {
        self.pc.create_offer(None).await
    }

    pub async fn set_local_description(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<(), webrtc::Error> {
        self.pc.set_local_description(offer).await
    }

    pub async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.pc.local_description().await
    }

    pub async fn set_remote_description(
        &self,
        answer: RTCSessionDescription,
    ) -> Result<(), webrtc::Error> {
        self.pc.set_remote_description(answer).await
    }

    pub async fn wait_for_ice_candidates(&self, wait_timeout: Duration) {
        wait_for_ice_candidates(&self.pc, wait_timeout).await;
    }

    pub async fn close(&self) -> Result<(), webrtc::Error> {
        self.pc.close().await
    }
}
