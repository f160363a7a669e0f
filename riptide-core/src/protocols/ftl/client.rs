use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha512;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::protocols::ftl::error::FtlError;
use crate::protocols::ftl::proto::{
    CLIENT_MEDIA_PORT_REGEX, RESPONSE_OK, RESPONSE_PONG, VERSION_MAJOR, VERSION_MINOR,
};
use crate::protocols::ftl::server::ConnectionMetadata;
use crate::types::{ChannelId, StreamKey};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Broadcaster side of an FTL session: handshake, metadata, then RTP
/// datagrams at the granted media port. Used for relaying to other ingest
/// nodes and for exercising the server.
#[derive(Debug)]
pub struct FtlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    media: Option<UdpSocket>,
    assigned_media_port: u16,
    channel_id: ChannelId,
}

impl FtlClient {
    /// Connect, authenticate, negotiate metadata and open the media flow.
    pub async fn dial(
        host: &str,
        port: u16,
        channel_id: ChannelId,
        stream_key: &StreamKey,
        metadata: &ConnectionMetadata,
    ) -> Result<FtlClient, FtlError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(FtlError::Read)?;
        let (reader, writer) = stream.into_split();
        let mut client = FtlClient {
            reader: BufReader::new(reader),
            writer,
            media: None,
            assigned_media_port: 0,
            channel_id,
        };

        client.authenticate(stream_key).await?;
        client.send_metadata(metadata).await?;
        client.start_media().await?;

        let media = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(FtlError::Read)?;
        media
            .connect((host, client.assigned_media_port))
            .await
            .map_err(FtlError::Write)?;
        client.media = Some(media);

        Ok(client)
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn assigned_media_port(&self) -> u16 {
        self.assigned_media_port
    }

    /// Ship one RTP datagram to the granted media port.
    pub async fn send_media(&self, datagram: &[u8]) -> Result<(), FtlError> {
        let media = self.media.as_ref().ok_or(FtlError::Closed)?;
        media.send(datagram).await.map_err(FtlError::Write)?;
        Ok(())
    }

    /// Control-channel keepalive; the raw status string comes back so callers
    /// can react to `410`.
    pub async fn ping(&mut self) -> Result<String, FtlError> {
        self.request("PING").await
    }

    pub async fn disconnect(mut self) -> Result<(), FtlError> {
        self.write_message("DISCONNECT").await
    }

    async fn authenticate(&mut self, stream_key: &StreamKey) -> Result<(), FtlError> {
        let response = self.request("HMAC").await?;
        let encoded = response
            .strip_prefix("200 ")
            .ok_or_else(|| FtlError::UnexpectedResponse(response.clone()))?;
        let challenge = hex::decode(encoded).map_err(|_| FtlError::InvalidHmacHex)?;

        let mut mac = Hmac::<Sha512>::new_from_slice(stream_key.as_bytes())
            .map_err(|_| FtlError::InvalidHmacHash)?;
        mac.update(&challenge);
        let hash = hex::encode(mac.finalize().into_bytes());

        let response = self
            .request(&format!("CONNECT {} ${hash}", self.channel_id))
            .await?;
        expect_response(&response, RESPONSE_OK)
    }

    async fn send_metadata(&mut self, metadata: &ConnectionMetadata) -> Result<(), FtlError> {
        let attributes = [
            format!("ProtocolVersion: {VERSION_MAJOR}.{VERSION_MINOR}"),
            format!("VendorName: {}", metadata.vendor_name),
            format!("VendorVersion: {}", metadata.vendor_version),
            format!("Video: {}", metadata.has_video),
            format!("VideoCodec: {}", metadata.video_codec),
            format!("VideoHeight: {}", metadata.video_height),
            format!("VideoWidth: {}", metadata.video_width),
            format!("VideoPayloadType: {}", metadata.video_payload_type),
            format!("VideoIngestSSRC: {}", metadata.video_ingest_ssrc),
            format!("Audio: {}", metadata.has_audio),
            format!("AudioCodec: {}", metadata.audio_codec),
            format!("AudioPayloadType: {}", metadata.audio_payload_type),
            format!("AudioIngestSSRC: {}", metadata.audio_ingest_ssrc),
        ];
        for attribute in &attributes {
            self.write_message(attribute).await?;
        }
        Ok(())
    }

    async fn start_media(&mut self) -> Result<(), FtlError> {
        let response = self.request(".").await?;
        let captures = CLIENT_MEDIA_PORT_REGEX
            .captures(&response)
            .ok_or_else(|| FtlError::UnexpectedResponse(response.clone()))?;
        self.assigned_media_port = captures[1]
            .parse()
            .map_err(|_| FtlError::UnexpectedResponse(response.clone()))?;
        Ok(())
    }

    async fn request(&mut self, message: &str) -> Result<String, FtlError> {
        self.write_message(message).await?;
        self.read_response().await
    }

    async fn write_message(&mut self, message: &str) -> Result<(), FtlError> {
        debug!("FTL SEND: {message}");
        self.writer
            .write_all(format!("{message}\r\n\r\n").as_bytes())
            .await
            .map_err(FtlError::Write)
    }

    async fn read_response(&mut self) -> Result<String, FtlError> {
        let mut line = String::new();
        let read = timeout(RESPONSE_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| FtlError::Timeout)?
            .map_err(FtlError::Read)?;
        if read == 0 {
            return Err(FtlError::Closed);
        }
        let line = line.trim_end_matches('\n').to_string();
        debug!("FTL RECV: {line}");
        Ok(line)
    }
}

/// Whether a PING answer still means the stream is welcome.
pub fn is_pong(response: &str) -> bool {
    response == RESPONSE_PONG
}

fn expect_response(response: &str, expected: &str) -> Result<(), FtlError> {
    if response != expected {
        return Err(FtlError::UnexpectedResponse(response.to_string()));
    }
    Ok(())
}
