mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use riptide_core::control::Control;
use riptide_core::protocols::ftl::{is_pong, ConnectionMetadata, FtlClient, FtlError, FtlServer};
use riptide_core::types::{ChannelId, StreamKey};
use support::{new_control, MockBackend};
use tokio::net::TcpListener;
use tokio::time::sleep;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::marshal::Marshal;

const CHANNEL: ChannelId = ChannelId(42);

async fn start_server() -> (Arc<Control>, Arc<MockBackend>, SocketAddr) {
    let backend = MockBackend::new();
    let control = new_control(&backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = FtlServer::new(control.clone());
    let cancel = control.shutdown_token();
    tokio::spawn(async move {
        server.listen(listener, cancel).await;
    });

    (control, backend, addr)
}

fn broadcast_metadata() -> ConnectionMetadata {
    ConnectionMetadata {
        vendor_name: "riptide-relay".to_string(),
        vendor_version: "1.0".to_string(),
        has_video: true,
        video_codec: "H264".to_string(),
        video_height: 720,
        video_width: 1280,
        video_payload_type: 96,
        video_ingest_ssrc: 43,
        has_audio: true,
        audio_codec: "OPUS".to_string(),
        audio_payload_type: 97,
        audio_ingest_ssrc: 42,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn client_completes_the_whole_handshake() {
    let (control, _backend, addr) = start_server().await;

    let mut client = FtlClient::dial(
        "127.0.0.1",
        addr.port(),
        CHANNEL,
        &StreamKey::from("abcd"),
        &broadcast_metadata(),
    )
    .await
    .unwrap();

    assert_ne!(client.assigned_media_port(), 0);
    assert_eq!(control.get_tracks(CHANNEL).unwrap().len(), 2);

    // Vendor metadata made it through the attribute phase.
    let stream = control.get_stream(CHANNEL).unwrap();
    let metadata = stream.metadata_snapshot("ingest-test");
    assert_eq!(metadata.vendor_name, "riptide-relay");
    assert_eq!(metadata.video_width, 1280);

    // Media flows to the granted port.
    let video = Packet {
        header: Header {
            version: 2,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 9000,
            ssrc: 43,
            marker: true,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x65, 0x88]),
    };
    client.send_media(&video.marshal().unwrap()).await.unwrap();

    let mut counted = false;
    for _ in 0..200 {
        if stream.total_video_packets() >= 1 {
            counted = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(counted, "video packet never counted");

    let pong = client.ping().await.unwrap();
    assert!(is_pong(&pong), "unexpected ping response: {pong}");

    client.disconnect().await.unwrap();
    let mut closed = false;
    for _ in 0..200 {
        if control.get_stream(CHANNEL).is_none() {
            closed = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(closed, "stream survived client disconnect");
}

#[tokio::test(flavor = "multi_thread")]
async fn client_dial_fails_with_the_wrong_key() {
    let (control, _backend, addr) = start_server().await;

    let err = FtlClient::dial(
        "127.0.0.1",
        addr.port(),
        CHANNEL,
        &StreamKey::from("wrong"),
        &broadcast_metadata(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        FtlError::UnexpectedResponse(_) | FtlError::Closed
    ));

    let mut deregistered = false;
    for _ in 0..200 {
        if control.get_stream(CHANNEL).is_none() {
            deregistered = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(deregistered, "stream stayed registered after failed dial");
}
