//! WHEP egress: viewers (and the engine's own thumbnailer) subscribe to a
//! channel's republished tracks with a single HTTP-carried SDP exchange.
//!
//! The exchange is inverted relative to WHIP: the empty POST to the endpoint
//! returns the server's OFFER plus a `Location` resource, and the subscriber
//! POSTs its ANSWER to that resource.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tower_http::cors::CorsLayer;
use uuid::Uuid;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::control::Control;
use crate::types::ChannelId;
use crate::webrtc_peer::SendonlyPeerConnection;

/// A subscriber has this long to finish negotiating before its peer
/// connection is reaped.
const PEER_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WhepConfig {
    /// Public base URL subscribers can reach this server on, used to build
    /// the `Location` header (e.g. `http://localhost:8091`).
    pub public_base: String,
}

pub struct WhepServer {
    state: WhepState,
}

#[derive(Clone)]
struct WhepState {
    control: Arc<Control>,
    sessions: Arc<Mutex<HashMap<String, SendonlyPeerConnection>>>,
    public_base: Arc<str>,
}

impl WhepServer {
    pub fn new(control: Arc<Control>, config: WhepConfig) -> Self {
        WhepServer {
            state: WhepState {
                control,
                sessions: Arc::new(Mutex::new(HashMap::new())),
                public_base: Arc::from(config.public_base),
            },
        }
    }

    pub async fn listen(self, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!("Starting WHEP server on {addr}");
        }

        let app = Router::new()
            .route("/whep/endpoint/:channel_id", post(handle_endpoint))
            .route("/whep/resource/:peer_id", post(handle_resource))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            error!(%err, "WHEP server exited with an error");
        }
    }
}

impl WhepState {
    fn insert_session(&self, peer_id: String, peer: SendonlyPeerConnection) {
        self.sessions.lock().unwrap().insert(peer_id, peer);
    }

    fn get_session(&self, peer_id: &str) -> Option<SendonlyPeerConnection> {
        self.sessions.lock().unwrap().get(peer_id).cloned()
    }

    fn remove_session(&self, peer_id: &str) {
        if let Some(peer) = self.sessions.lock().unwrap().remove(peer_id) {
            tokio::spawn(async move {
                if let Err(err) = peer.close().await {
                    warn!(%err, "failed to close WHEP peer connection");
                }
            });
        }
    }

    /// Reap the session if it never reached `connected`.
    fn reap_after_timeout(&self, peer_id: String) {
        let state = self.clone();
        tokio::spawn(async move {
            sleep(PEER_CONNECTION_TIMEOUT).await;
            if let Some(peer) = state.get_session(&peer_id) {
                if peer.connection_state() != RTCPeerConnectionState::Connected {
                    warn!(peer_id, "closing WHEP peer that never connected");
                    state.remove_session(&peer_id);
                }
            }
        });
    }
}

async fn handle_endpoint(
    Path(channel_id): Path<u32>,
    State(state): State<WhepState>,
) -> Result<Response<Body>, WhepError> {
    let channel_id = ChannelId(channel_id);
    let tracks = state
        .control
        .get_tracks(channel_id)
        .map_err(|_| WhepError::NotFound(format!("no active stream for channel {channel_id}")))?;

    let peer_id = Uuid::new_v4().to_string();
    info!(peer_id, %channel_id, "WHEP negotiation: started");

    let peer = SendonlyPeerConnection::new().await?;
    // Tracks have to be attached before the offer is created.
    for stream_track in tracks {
        peer.add_track(stream_track.track).await?;
    }

    {
        let state = state.clone();
        let peer_id = peer_id.clone();
        peer.on_peer_connection_state_change(Box::new(move |connection_state| {
            if matches!(
                connection_state,
                RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
            ) {
                state.remove_session(&peer_id);
            }
            Box::pin(async {})
        }));
    }

    let offer = peer.create_offer().await?;
    peer.set_local_description(offer).await?;
    peer.wait_for_ice_candidates(ICE_GATHER_TIMEOUT).await;
    let offer = peer
        .local_description()
        .await
        .ok_or_else(|| WhepError::Internal("local description is not set".to_string()))?;

    state.insert_session(peer_id.clone(), peer);
    state.reap_after_timeout(peer_id.clone());

    let response = Response::builder()
        .status(StatusCode::CREATED)
        .header("Content-Type", "application/sdp")
        .header("Access-Control-Expose-Headers", "Location, Expire")
        .header(
            "Location",
            format!("{}/whep/resource/{}", state.public_base, peer_id),
        )
        .body(Body::from(offer.sdp))?;
    Ok(response)
}

async fn handle_resource(
    Path(peer_id): Path<String>,
    State(state): State<WhepState>,
    answer: String,
) -> Result<Response<Body>, WhepError> {
    let peer = state
        .get_session(&peer_id)
        .ok_or_else(|| WhepError::NotFound(format!("unknown WHEP session {peer_id}")))?;

    if answer.trim().is_empty() {
        return Err(WhepError::BadRequest("missing SDP answer body".to_string()));
    }
    let answer = RTCSessionDescription::answer(answer)
        .map_err(|err| WhepError::BadRequest(format!("invalid SDP answer: {err}")))?;
    peer.set_remote_description(answer).await?;
    info!(peer_id, "WHEP negotiation: answer applied");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())?)
}

#[derive(Debug, thiserror::Error)]
pub enum WhepError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("http: {0}")]
    Http(#[from] axum::http::Error),
}

impl IntoResponse for WhepError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            WhepError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WhepError::NotFound(_) => StatusCode::NOT_FOUND,
            WhepError::Internal(_) | WhepError::WebRtc(_) | WhepError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}
