use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use crate::h264;

/// Reassembles a single H.264 keyframe out of a lossy RTP stream.
///
/// The first packet that classifies as a keyframe part latches the frame's
/// RTP timestamp; packets with any other timestamp are dropped until the
/// frame completes. When the packet carrying the marker bit arrives, the
/// collected payloads are depacketized in ascending sequence order and
/// emitted as one concatenated Annex-B blob.
#[derive(Default)]
pub struct Keyframer {
    timestamp: u32,
    frame_started: bool,
    packets: BTreeMap<u16, Bytes>,
    last_full_keyframe: Option<Bytes>,
}

impl Keyframer {
    pub fn new() -> Self {
        Keyframer::default()
    }

    /// Clear in-progress state. The last completed keyframe is retained.
    pub fn reset(&mut self) {
        self.timestamp = 0;
        self.frame_started = false;
        self.packets.clear();
    }

    /// The last fully reassembled keyframe, if any.
    pub fn latest(&self) -> Option<Bytes> {
        self.last_full_keyframe.clone()
    }

    /// Feed one RTP packet; returns the full keyframe when this packet closes
    /// the frame.
    pub fn submit(&mut self, packet: &Packet) -> Option<Bytes> {
        if self.frame_started && self.timestamp != packet.header.timestamp {
            return None;
        }

        if !self.frame_started && h264::is_keyframe_part(&packet.payload) {
            self.timestamp = packet.header.timestamp;
            self.frame_started = true;
        }
        if !self.frame_started {
            return None;
        }

        // Same sequence number twice: the later packet wins.
        self.packets
            .insert(packet.header.sequence_number, packet.payload.clone());

        if !packet.header.marker {
            return None;
        }

        let mut depacketizer = H264Packet::default();
        let mut frame = Vec::new();
        for (sequence_number, payload) in &self.packets {
            match depacketizer.depacketize(payload) {
                Ok(nal) => frame.extend_from_slice(&nal),
                Err(err) => {
                    debug!(sequence_number = *sequence_number, %err, "skipping undecodable keyframe packet");
                }
            }
        }

        let frame = Bytes::from(frame);
        self.last_full_keyframe = Some(frame.clone());
        self.reset();
        Some(frame)
    }
}
