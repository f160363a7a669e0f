//! FTL ("Faster-Than-Light") ingest: a line-oriented TCP control channel with
//! an HMAC-SHA512 challenge handshake, plus an RTP media flow on a
//! dynamically allocated UDP port.

mod client;
mod error;
mod ingest;
mod proto;
mod server;

pub use client::{is_pong, FtlClient};
pub use error::FtlError;
pub use ingest::IngestHandler;
pub use proto::{MAX_LINE_LEN_BYTES, PACKET_MTU, READ_TIMEOUT};
pub use server::{ConnectionHandler, ConnectionMetadata, FtlServer};
