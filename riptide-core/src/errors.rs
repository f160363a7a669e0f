use crate::types::ChannelId;

/// Errors surfaced by the control engine.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no active stream for channel {0}")]
    NotFound(ChannelId),

    #[error("stream already exists for channel {0}")]
    AlreadyExists(ChannelId),

    #[error("incorrect stream key")]
    Unauthenticated,

    #[error("track kind must be audio or video")]
    InvalidTrack,

    #[error("service: {0}")]
    Service(#[from] ServiceError),

    #[error("orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("thumbnail: {0}")]
    Decode(#[from] ThumbnailError),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("service denied the request: {0}")]
    Denied(String),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("orchestrator denied the request: {0}")]
    Denied(String),
}

/// H.264 keyframe decoding and JPEG encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("h264 decode failed: {0}")]
    Decode(String),

    #[error("keyframe did not produce a picture")]
    NoPicture,

    #[error("jpeg encode failed: {0}")]
    Encode(String),
}
