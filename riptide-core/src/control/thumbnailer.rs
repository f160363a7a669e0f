//! Keyframe capture via the server's own WHEP output.
//!
//! Instead of tapping the ingest path, each stream subscribes to its own
//! republished video over WHEP. That hands the keyframer the same
//! depacketized flow viewers see and keeps it independent of which ingest
//! protocol fed the stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::control::{Keyframer, Stream};
use crate::webrtc_peer::RecvonlyPeerConnection;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
enum SubscribeError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Endpoint(u16),

    #[error("endpoint response carried no location header")]
    MissingLocation,

    #[error("local description is not set")]
    NoLocalDescription,

    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
}

/// Runs for the stream's whole life; failed sessions are retried until the
/// stream's cancellation fires.
pub(super) async fn run(stream: Arc<Stream>, endpoint: String) {
    let channel_id = stream.channel_id();
    let cancel = stream.cancel_token();
    info!(%channel_id, "started thumbnailer");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = subscribe(&stream, &endpoint) => match result {
                Ok(()) => break,
                Err(err) => warn!(%channel_id, %err, "thumbnailer session failed"),
            },
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(RETRY_DELAY) => {}
        }
    }
    debug!(%channel_id, "ending thumbnailer");
}

/// One WHEP session: fetch the endpoint's OFFER, answer it, then feed every
/// H.264 packet through a keyframer until the stream is cancelled.
async fn subscribe(stream: &Arc<Stream>, endpoint: &str) -> Result<(), SubscribeError> {
    let cancel = stream.cancel_token();
    let client = reqwest::Client::new();
    let url = format!("{endpoint}/{}", stream.channel_id());

    // WHEP protocol inversion: the empty POST returns the server's OFFER and
    // the resource to answer to.
    let response = client
        .post(&url)
        .header("Accept", "application/sdp")
        .body("")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(SubscribeError::Endpoint(response.status().as_u16()));
    }
    let location = response
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or(SubscribeError::MissingLocation)?;
    let offer = response.text().await?;

    let peer = RecvonlyPeerConnection::new().await?;

    {
        let stream = stream.clone();
        let cancel = cancel.clone();
        peer.on_track(Box::new(move |track, _, _| {
            let stream = stream.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mime_type = track.codec().capability.mime_type.clone();
                if !mime_type.eq_ignore_ascii_case(MIME_TYPE_H264) {
                    debug!(mime_type, "ignoring non-H264 track");
                    return;
                }
                let mut keyframer = Keyframer::new();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        read = track.read_rtp() => {
                            let Ok((packet, _)) = read else { break };
                            if let Some(keyframe) = keyframer.submit(&packet) {
                                stream.push_thumbnail(keyframe);
                            }
                        }
                    }
                }
            });
            Box::pin(async {})
        }));
    }

    peer.set_remote_description(RTCSessionDescription::offer(offer)?)
        .await?;
    let answer = peer.create_answer().await?;
    peer.set_local_description(answer).await?;
    // One signaling round trip only, so trickle ICE is off: wait out the
    // candidate gathering before shipping the answer.
    peer.wait_for_ice_candidates(ICE_GATHER_TIMEOUT).await;
    let answer = peer
        .local_description()
        .await
        .ok_or(SubscribeError::NoLocalDescription)?;

    client
        .post(&location)
        .header("Accept", "application/sdp")
        .body(answer.sdp)
        .send()
        .await?;

    cancel.cancelled().await;
    if let Err(err) = peer.close().await {
        debug!(%err, "failed to close thumbnailer peer connection");
    }
    Ok(())
}
