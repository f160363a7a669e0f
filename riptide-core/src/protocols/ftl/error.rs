use crate::errors::ControlError;
use crate::protocols::ftl::proto::MAX_LINE_LEN_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum FtlError {
    #[error("connection is closed")]
    Closed,

    #[error("error during read: {0}")]
    Read(std::io::Error),

    #[error("error during write: {0}")]
    Write(std::io::Error),

    #[error("control connection timed out")]
    Timeout,

    #[error("control line exceeds {MAX_LINE_LEN_BYTES} bytes")]
    LineTooLong,

    #[error("unexpected arguments")]
    UnexpectedArguments,

    #[error("control connection attempted command before successful authentication")]
    ConnectBeforeAuth,

    #[error("control connection attempted multiple CONNECT handshakes")]
    MultipleConnect,

    #[error("client provided invalid HMAC hash")]
    InvalidHmacHash,

    #[error("client provided HMAC hash that could not be hex decoded")]
    InvalidHmacHex,

    #[error("unexpected reply from server: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Control(#[from] ControlError),
}
