use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use webrtc::interceptor::nack::generator::Generator;
use webrtc::interceptor::stream_info::{RTCPFeedback, StreamInfo};
use webrtc::interceptor::{Attributes, Interceptor, InterceptorBuilder, RTCPWriter, RTPReader};
use webrtc::rtcp::transport_feedbacks::transport_layer_nack::TransportLayerNack;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::{Marshal, Unmarshal};

use crate::control::Control;
use crate::protocols::ftl::error::FtlError;
use crate::protocols::ftl::ingest::IngestHandler;
use crate::protocols::ftl::proto::{
    self, LineScanner, ATTRIBUTE_REGEX, CONNECT_REGEX, HMAC_PAYLOAD_SIZE,
    PAYLOAD_TYPE_PING, PAYLOAD_TYPE_SENDER_REPORT, SENDER_REPORT_LEN,
};
use crate::types::{ChannelId, StreamKey};

type HmacSha512 = Hmac<Sha512>;

/// Callbacks a connection fires into the rest of the system. Implemented by
/// [`IngestHandler`]; the connection itself never touches the control engine.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// The channel's stream key, fetched after `on_connect`.
    async fn hmac_key(&self) -> Result<StreamKey, FtlError>;

    /// A broadcaster named its channel; allocate the stream.
    async fn on_connect(&self, channel_id: ChannelId) -> Result<(), FtlError>;

    /// Metadata negotiation finished; media is about to flow.
    async fn on_play(&self, metadata: &ConnectionMetadata) -> Result<(), FtlError>;

    /// One video RTP packet. `Err` terminates the media flow.
    async fn on_video(&self, packet: Packet) -> Result<(), FtlError>;

    /// One audio RTP packet. `Err` terminates the media flow.
    async fn on_audio(&self, packet: Packet) -> Result<(), FtlError>;

    /// Whether the stream behind this connection is still running.
    async fn is_active(&self) -> bool;

    /// The transport is gone, tear everything down.
    async fn on_close(&self);
}

/// Attributes negotiated during the FTL metadata phase.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadata {
    pub protocol_version: String,
    pub vendor_name: String,
    pub vendor_version: String,

    pub has_video: bool,
    pub video_codec: String,
    pub video_height: u32,
    pub video_width: u32,
    pub video_payload_type: u8,
    pub video_ingest_ssrc: u32,

    pub has_audio: bool,
    pub audio_codec: String,
    pub audio_payload_type: u8,
    pub audio_ingest_ssrc: u32,
}

/// Accepts FTL control connections and runs one session task per
/// broadcaster.
pub struct FtlServer {
    control: Arc<Control>,
}

impl FtlServer {
    pub fn new(control: Arc<Control>) -> Self {
        FtlServer { control }
    }

    pub async fn listen(&self, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!("Starting FTL server on {addr}");
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (socket, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(%err, "failed to accept FTL connection");
                    continue;
                }
            };

            let handler = Arc::new(IngestHandler::new(self.control.clone()));
            let connection = FtlConnection::new(socket, handler, cancel.child_token());
            let span = info_span!("ftl_connection", %peer);
            tokio::spawn(connection.run().instrument(span));
        }
    }
}

enum Flow {
    Continue,
    Disconnect,
}

pub(super) struct FtlConnection<H> {
    scanner: LineScanner<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    handler: Arc<H>,

    channel_id: Option<ChannelId>,
    hmac_payload: Vec<u8>,
    authenticated: bool,
    connect_requested: bool,
    metadata: ConnectionMetadata,
    assigned_media_port: u16,

    media_cancel: CancellationToken,
    media_connected: bool,
}

impl<H: ConnectionHandler + 'static> FtlConnection<H> {
    pub(super) fn new(socket: TcpStream, handler: Arc<H>, cancel: CancellationToken) -> Self {
        let (reader, writer) = socket.into_split();
        FtlConnection {
            scanner: LineScanner::new(reader),
            writer,
            handler,
            channel_id: None,
            hmac_payload: Vec::new(),
            authenticated: false,
            connect_requested: false,
            metadata: ConnectionMetadata::default(),
            assigned_media_port: 0,
            media_cancel: cancel,
            media_connected: false,
        }
    }

    pub(super) async fn run(mut self) {
        if let Err(err) = self.read_loop().await {
            warn!(channel_id = ?self.channel_id, %err, "closing FTL connection");
        }
        self.media_cancel.cancel();
        self.handler.on_close().await;
    }

    async fn read_loop(&mut self) -> Result<(), FtlError> {
        loop {
            let line = tokio::select! {
                _ = self.media_cancel.cancelled() => return Ok(()),
                line = self.scanner.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(());
            };
            if line.is_empty() || line == "\n" {
                continue;
            }
            match self.process_command(&line).await? {
                Flow::Continue => {}
                Flow::Disconnect => return Ok(()),
            }
        }
    }

    async fn process_command(&mut self, command: &str) -> Result<Flow, FtlError> {
        debug!("FTL RECV: {command}");
        if command == "HMAC" {
            self.process_hmac().await?;
        } else if command.contains("DISCONNECT") {
            return Ok(Flow::Disconnect);
        } else if command.contains("CONNECT") {
            if let Err(err) = self.process_connect(command).await {
                let _ = self.send_message(proto::RESPONSE_INVALID_STREAM_KEY).await;
                return Err(err);
            }
        } else if command.contains("PING") {
            return self.process_ping().await;
        } else if ATTRIBUTE_REGEX.is_match(command) {
            self.process_attribute(command).await?;
        } else if command == "." {
            self.process_dot().await?;
        } else {
            warn!("Unknown ingest command: {command}");
        }
        Ok(Flow::Continue)
    }

    async fn process_hmac(&mut self) -> Result<(), FtlError> {
        let mut payload = vec![0u8; HMAC_PAYLOAD_SIZE];
        rand::rng().fill_bytes(&mut payload);
        self.hmac_payload = payload;

        let encoded = hex::encode(&self.hmac_payload);
        self.send_message(&proto::hmac_response(&encoded)).await
    }

    async fn process_connect(&mut self, command: &str) -> Result<(), FtlError> {
        if self.connect_requested {
            return Err(FtlError::MultipleConnect);
        }
        self.connect_requested = true;

        let captures = CONNECT_REGEX
            .captures(command)
            .ok_or(FtlError::UnexpectedArguments)?;
        let channel_id: u32 = captures[1]
            .parse()
            .map_err(|_| FtlError::UnexpectedArguments)?;
        let client_hash = hex::decode(&captures[2]).map_err(|_| FtlError::InvalidHmacHex)?;

        let channel_id = ChannelId(channel_id);
        self.channel_id = Some(channel_id);

        self.handler.on_connect(channel_id).await?;
        let key = self.handler.hmac_key().await?;

        let mut mac = HmacSha512::new_from_slice(key.as_bytes())
            .map_err(|_| FtlError::InvalidHmacHash)?;
        mac.update(&self.hmac_payload);
        if mac.verify_slice(&client_hash).is_err() {
            return Err(FtlError::InvalidHmacHash);
        }

        self.authenticated = true;
        self.send_message(proto::RESPONSE_OK).await
    }

    async fn process_attribute(&mut self, command: &str) -> Result<(), FtlError> {
        if !self.authenticated {
            return Err(FtlError::ConnectBeforeAuth);
        }

        let captures = ATTRIBUTE_REGEX
            .captures(command)
            .ok_or(FtlError::UnexpectedArguments)?;
        apply_attribute(&mut self.metadata, &captures[1], &captures[2]);
        Ok(())
    }

    async fn process_dot(&mut self) -> Result<(), FtlError> {
        if !self.authenticated {
            return Err(FtlError::ConnectBeforeAuth);
        }
        if self.media_connected {
            return Err(FtlError::UnexpectedArguments);
        }

        self.listen_for_media().await?;
        self.handler.on_play(&self.metadata).await?;
        self.send_message(&proto::media_port_response(self.assigned_media_port))
            .await
    }

    async fn process_ping(&mut self) -> Result<Flow, FtlError> {
        if !self.handler.is_active().await {
            self.send_message(proto::RESPONSE_SERVER_TERMINATE).await?;
            return Ok(Flow::Disconnect);
        }
        self.send_message(proto::RESPONSE_PONG).await?;
        Ok(Flow::Continue)
    }

    async fn listen_for_media(&mut self) -> Result<(), FtlError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(FtlError::Read)?;
        let port = socket.local_addr().map_err(FtlError::Read)?.port();
        self.assigned_media_port = port;
        self.media_connected = true;

        info!("Listening for UDP connections on: {port}");

        let media = MediaReader {
            socket: Arc::new(socket),
            handler: self.handler.clone(),
            video_payload_type: self.metadata.video_payload_type,
            audio_payload_type: self.metadata.audio_payload_type,
            video_ssrc: self.metadata.video_ingest_ssrc,
            cancel: self.media_cancel.clone(),
        };
        let span = info_span!("ftl_media", channel_id = ?self.channel_id, port);
        tokio::spawn(media.run().instrument(span));

        Ok(())
    }

    async fn send_message(&mut self, message: &str) -> Result<(), FtlError> {
        debug!("FTL SEND: {message}");
        let framed = format!("{message}\n");
        self.writer
            .write_all(framed.as_bytes())
            .await
            .map_err(FtlError::Write)
    }
}

fn apply_attribute(metadata: &mut ConnectionMetadata, key: &str, value: &str) {
    match key {
        "ProtocolVersion" => metadata.protocol_version = value.to_string(),
        "VendorName" => metadata.vendor_name = value.to_string(),
        "VendorVersion" => metadata.vendor_version = value.to_string(),
        "Video" => metadata.has_video = parse_attribute_bool(value),
        "VideoCodec" => metadata.video_codec = value.to_string(),
        "VideoHeight" => metadata.video_height = parse_attribute_u32(value),
        "VideoWidth" => metadata.video_width = parse_attribute_u32(value),
        "VideoPayloadType" => metadata.video_payload_type = parse_attribute_u8(value),
        "VideoIngestSSRC" => metadata.video_ingest_ssrc = parse_attribute_u32(value),
        "Audio" => metadata.has_audio = parse_attribute_bool(value),
        "AudioCodec" => metadata.audio_codec = value.to_string(),
        "AudioPayloadType" => metadata.audio_payload_type = parse_attribute_u8(value),
        "AudioIngestSSRC" => metadata.audio_ingest_ssrc = parse_attribute_u32(value),
        _ => info!("Unexpected attribute: {key:?}"),
    }
}

fn parse_attribute_u32(value: &str) -> u32 {
    value.parse().unwrap_or_default()
}

fn parse_attribute_u8(value: &str) -> u8 {
    value.parse::<u32>().unwrap_or_default() as u8
}

fn parse_attribute_bool(value: &str) -> bool {
    value == "true"
}

/// Reads RTP off the media socket, demultiplexes FTL's in-band control
/// payload types, and feeds video packets through a NACK generator bound to
/// the negotiated video SSRC.
struct MediaReader<H> {
    socket: Arc<UdpSocket>,
    handler: Arc<H>,
    video_payload_type: u8,
    audio_payload_type: u8,
    video_ssrc: u32,
    cancel: CancellationToken,
}

impl<H: ConnectionHandler + 'static> MediaReader<H> {
    async fn run(self) {
        let generator = match Generator::builder().build("") {
            Ok(generator) => generator,
            Err(err) => {
                error!(%err, "failed to build NACK generator");
                return;
            }
        };
        let stream_reader = generator
            .bind_remote_stream(
                &StreamInfo {
                    ssrc: self.video_ssrc,
                    rtcp_feedback: vec![RTCPFeedback {
                        typ: "nack".to_string(),
                        parameter: String::new(),
                    }],
                    ..Default::default()
                },
                Arc::new(PacketBufferReader),
            )
            .await;

        let mut rtcp_bound = false;
        let mut buffer = vec![0u8; 1500];
        loop {
            let (len, peer) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        error!(%err, "media socket read failed");
                        break;
                    }
                },
            };

            let mut raw = &buffer[..len];
            let packet = match Packet::unmarshal(&mut raw) {
                Ok(packet) => packet,
                // OBS is known to occasionally send payload-less RTP
                // (payload type 122); drop silently.
                Err(_) => continue,
            };

            if packet.header.payload_type == self.video_payload_type {
                if self.handler.on_video(packet).await.is_err() {
                    break;
                }
                // Only video packets feed the NACK generator.
                if let Err(err) = stream_reader
                    .read(&mut buffer[..len], &Attributes::default())
                    .await
                {
                    error!(%err, "NACK generator rejected packet");
                    break;
                }
            } else if packet.header.payload_type == self.audio_payload_type {
                if self.handler.on_audio(packet).await.is_err() {
                    break;
                }
            } else {
                let extended =
                    ((packet.header.marker as u8) << 7) | packet.header.payload_type;
                if extended == PAYLOAD_TYPE_PING {
                    // Round-trip-time probe: pong the same bytes back.
                    let _ = self.socket.send_to(&buffer[..len], peer).await;
                } else if extended == PAYLOAD_TYPE_SENDER_REPORT {
                    if len != SENDER_REPORT_LEN {
                        warn!(len, "invalid FTL sender report, expected {SENDER_REPORT_LEN} bytes");
                    }
                } else {
                    info!(
                        payload_type = extended,
                        original = packet.header.payload_type,
                        "unknown RTP payload type"
                    );
                }
            }

            if !rtcp_bound {
                let _ = generator
                    .bind_rtcp_writer(Arc::new(NackWriter {
                        socket: self.socket.clone(),
                        peer,
                    }))
                    .await;
                rtcp_bound = true;
            }
        }

        debug!("Cleaning up FTL NACK handler & media reader");
        if let Err(err) = generator.close().await {
            debug!(%err, "failed to close NACK generator");
        }
    }
}

/// Inner RTP reader for the NACK interceptor chain: the datagram has already
/// been received, so this just re-parses the buffer it is handed.
struct PacketBufferReader;

#[async_trait]
impl RTPReader for PacketBufferReader {
    async fn read(
        &self,
        buf: &mut [u8],
        attributes: &Attributes,
    ) -> Result<(Packet, Attributes), webrtc::interceptor::Error> {
        let mut raw = &buf[..];
        let packet = Packet::unmarshal(&mut raw)?;
        Ok((packet, attributes.clone()))
    }
}

/// Sends the generator's RTCP feedback back to the broadcaster's media
/// address.
struct NackWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

#[async_trait]
impl RTCPWriter for NackWriter {
    async fn write(
        &self,
        packets: &[Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>],
        _attributes: &Attributes,
    ) -> Result<usize, webrtc::interceptor::Error> {
        let mut data = Vec::new();
        for packet in packets {
            if let Some(nack) = packet.as_any().downcast_ref::<TransportLayerNack>() {
                info!(
                    sender_ssrc = nack.sender_ssrc,
                    media_ssrc = nack.media_ssrc,
                    "RTCP: sending NACK"
                );
            }
            data.extend_from_slice(&packet.marshal()?);
        }

        match self.socket.send_to(&data, self.peer).await {
            Ok(sent) => Ok(sent),
            Err(err) => {
                warn!(%err, "failed to send RTCP feedback");
                Ok(0)
            }
        }
    }
}
