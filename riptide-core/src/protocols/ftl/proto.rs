use std::sync::LazyLock;
use std::time::Duration;

use bytes::BytesMut;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::protocols::ftl::error::FtlError;

// FTL-SDK recommends a 1392-byte MTU for the media flow.
pub const PACKET_MTU: usize = 1392;

pub const MAX_LINE_LEN_BYTES: usize = 1024;
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub const HMAC_PAYLOAD_SIZE: usize = 128;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 2;

// FTL reuses the RTP marker bit to extend the payload type space past 127
// for its in-band control packets.
pub const PAYLOAD_TYPE_SENDER_REPORT: u8 = 200;
pub const PAYLOAD_TYPE_PING: u8 = 250;
pub const SENDER_REPORT_LEN: usize = 28;

pub const RESPONSE_OK: &str = "200";
pub const RESPONSE_PONG: &str = "201";
pub const RESPONSE_INVALID_STREAM_KEY: &str = "405";
pub const RESPONSE_SERVER_TERMINATE: &str = "410";
pub const RESPONSE_INTERNAL_SERVER_ERROR: &str = "500";

pub static CONNECT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CONNECT ([0-9]+) \$([0-9a-f]+)$").unwrap());
pub static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.+): (.+)").unwrap());
pub static CLIENT_MEDIA_PORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^200\. Use UDP port (\d+)$").unwrap());

pub fn hmac_response(encoded_payload: &str) -> String {
    format!("200 {encoded_payload}")
}

pub fn media_port_response(port: u16) -> String {
    format!("200. Use UDP port {port}")
}

/// Reads CRLF-delimited command lines off the control transport, capping the
/// line length and enforcing the inactivity timeout.
pub(super) struct LineScanner<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> LineScanner<R> {
    pub fn new(reader: R) -> Self {
        LineScanner {
            reader,
            buffer: BytesMut::with_capacity(MAX_LINE_LEN_BYTES),
        }
    }

    /// Next line without its CRLF, or `None` on a clean EOF. Partial trailing
    /// lines at EOF are discarded.
    pub async fn next_line(&mut self) -> Result<Option<String>, FtlError> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                if pos > MAX_LINE_LEN_BYTES {
                    return Err(FtlError::LineTooLong);
                }
                let line = self.buffer.split_to(pos + 2);
                return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
            }
            if self.buffer.len() > MAX_LINE_LEN_BYTES + 1 {
                return Err(FtlError::LineTooLong);
            }

            let mut chunk = [0u8; 512];
            let read = timeout(READ_TIMEOUT, self.reader.read(&mut chunk))
                .await
                .map_err(|_| FtlError::Timeout)?
                .map_err(FtlError::Read)?;
            if read == 0 {
                self.buffer.clear();
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\r\n")
}
