mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hmac::{Hmac, Mac};
use riptide_core::control::Control;
use riptide_core::protocols::ftl::FtlServer;
use riptide_core::types::ChannelId;
use sha2::Sha512;
use support::{new_control, MockBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::sleep;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Marshal;

const CHANNEL: ChannelId = ChannelId(42);

struct TestServer {
    control: Arc<Control>,
    backend: Arc<MockBackend>,
    addr: SocketAddr,
}

async fn start_server() -> TestServer {
    let backend = MockBackend::new();
    let control = new_control(&backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = FtlServer::new(control.clone());
    let cancel = control.shutdown_token();
    tokio::spawn(async move {
        server.listen(listener, cancel).await;
    });

    TestServer {
        control,
        backend,
        addr,
    }
}

struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Client {
        Client {
            stream: TcpStream::connect(addr).await.unwrap(),
            buffer: Vec::new(),
        }
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n\r\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next `\n`-terminated server response, or `None` once the server hangs
    /// up.
    async fn read_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
            let mut chunk = [0u8; 256];
            let read = self.stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                return None;
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

fn hmac_hex(key: &str, challenge_hex: &str) -> String {
    let challenge = hex::decode(challenge_hex).unwrap();
    let mut mac = Hmac::<Sha512>::new_from_slice(key.as_bytes()).unwrap();
    mac.update(&challenge);
    hex::encode(mac.finalize().into_bytes())
}

async fn handshake(client: &mut Client, key: &str) -> String {
    client.send("HMAC").await;
    let response = client.read_line().await.unwrap();
    let challenge = response.strip_prefix("200 ").unwrap().to_string();
    assert_eq!(challenge.len(), 256, "challenge must be 128 random bytes");

    let hash = hmac_hex(key, &challenge);
    client.send(&format!("CONNECT 42 ${hash}")).await;
    client.read_line().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn hmac_happy_path_registers_the_stream() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    let response = handshake(&mut client, "abcd").await;
    assert_eq!(response, "200");

    let tracks = server.control.get_tracks(CHANNEL).unwrap();
    assert_eq!(tracks.len(), 2);

    client.send("PING").await;
    assert_eq!(client.read_line().await.as_deref(), Some("201"));
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_key_is_rejected_and_nothing_stays_registered() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    let response = handshake(&mut client, "wrong").await;
    assert_eq!(response, "405");
    // The server hangs up after the rejection.
    assert_eq!(client.read_line().await, None);

    // The transiently allocated stream is rolled back.
    let mut deregistered = false;
    for _ in 0..200 {
        if server.control.get_stream(CHANNEL).is_none() {
            deregistered = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(deregistered, "stream stayed registered after auth failure");
}

#[tokio::test(flavor = "multi_thread")]
async fn attributes_dot_and_media_flow() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;
    assert_eq!(handshake(&mut client, "abcd").await, "200");

    for attribute in [
        "ProtocolVersion: 0.9",
        "VendorName: OBS Studio",
        "VendorVersion: 30.0",
        "Video: true",
        "VideoCodec: H264",
        "VideoPayloadType: 96",
        "VideoIngestSSRC: 123",
        "Audio: true",
        "AudioCodec: OPUS",
        "AudioPayloadType: 97",
        "AudioIngestSSRC: 124",
    ] {
        client.send(attribute).await;
    }
    client.send(".").await;

    let response = client.read_line().await.unwrap();
    let port: u16 = response
        .strip_prefix("200. Use UDP port ")
        .unwrap_or_else(|| panic!("unexpected media port response: {response}"))
        .parse()
        .unwrap();

    let media = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    // One video packet, one audio packet.
    let video = rtp_packet(96, 123, 100, true, &[0x65, 0xAA]);
    media.send_to(&video, target).await.unwrap();
    let audio = rtp_packet(97, 124, 50, false, &[0x01, 0x02]);
    media.send_to(&audio, target).await.unwrap();

    let stream = server.control.get_stream(CHANNEL).unwrap();
    let mut counted = false;
    for _ in 0..200 {
        if stream.total_video_packets() >= 1 && stream.total_audio_packets() >= 1 {
            counted = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(counted, "media packets never reached the stream counters");

    // FTL ping (extended payload type 250) echoes the datagram back.
    let ping = rtp_packet(122, 9, 1, true, &[]);
    media.send_to(&ping, target).await.unwrap();
    let mut echo = [0u8; 64];
    let (echoed, _) = tokio::time::timeout(Duration::from_secs(2), media.recv_from(&mut echo))
        .await
        .expect("no ping echo")
        .unwrap();
    assert_eq!(&echo[..echoed], &ping[..]);

    client.send("DISCONNECT").await;
    let mut closed = false;
    for _ in 0..200 {
        if server.control.get_stream(CHANNEL).is_none() {
            closed = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(closed, "stream survived DISCONNECT");
    assert!(server.backend.has_call(&support::Call::ServiceEndStream(43)));
}

#[tokio::test(flavor = "multi_thread")]
async fn commands_before_auth_close_the_connection() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    client.send("VideoPayloadType: 96").await;
    assert_eq!(client.read_line().await, None);
    assert!(server.control.get_stream(CHANNEL).is_none());
}

fn rtp_packet(payload_type: u8, ssrc: u32, sequence_number: u16, marker: bool, payload: &[u8]) -> Bytes {
    let packet = Packet {
        header: Header {
            version: 2,
            payload_type,
            sequence_number,
            timestamp: 1000,
            ssrc,
            marker,
            ..Default::default()
        },
        payload: Bytes::copy_from_slice(payload),
    };
    packet.marshal().unwrap()
}
