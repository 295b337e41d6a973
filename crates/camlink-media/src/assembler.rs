//! Reassembles depacketized RTP into whole frames.

use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::media::Sample;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packet::Packet;

use crate::{Codec, EncodedFrame, VIDEO_CLOCK_RATE};

/// How many packets a frame may trail behind before it is given up on.
const MAX_LATE_PACKETS: u16 = 256;

enum Builder {
    Vp8(SampleBuilder<Vp8Packet>),
    H264(SampleBuilder<H264Packet>),
}

pub struct FrameAssembler {
    codec: Codec,
    builder: Builder,
}

impl FrameAssembler {
    pub fn new(codec: Codec) -> Self {
        let builder = match codec {
            Codec::Vp8 => Builder::Vp8(SampleBuilder::new(
                MAX_LATE_PACKETS,
                Vp8Packet::default(),
                VIDEO_CLOCK_RATE,
            )),
            // Default H264Packet emits Annex-B, which is what the recorder and
            // keyframe detection expect.
            Codec::H264 => Builder::H264(SampleBuilder::new(
                MAX_LATE_PACKETS,
                H264Packet::default(),
                VIDEO_CLOCK_RATE,
            )),
        };
        Self { codec, builder }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Feeds one packet and returns every frame it completed.
    pub fn push(&mut self, packet: Packet) -> Vec<EncodedFrame> {
        let mut frames = Vec::new();
        match &mut self.builder {
            Builder::Vp8(builder) => {
                builder.push(packet);
                while let Some(sample) = builder.pop() {
                    frames.push(to_frame(self.codec, sample));
                }
            }
            Builder::H264(builder) => {
                builder.push(packet);
                while let Some(sample) = builder.pop() {
                    frames.push(to_frame(self.codec, sample));
                }
            }
        }
        frames
    }
}

fn to_frame(codec: Codec, sample: Sample) -> EncodedFrame {
    let timestamp_us = sample.packet_timestamp as u64 * 1_000_000 / VIDEO_CLOCK_RATE as u64;
    EncodedFrame::new(codec, sample.data, timestamp_us, sample.duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_vp8_frame;
    use bytes::{BufMut, Bytes, BytesMut};
    use webrtc::rtp::header::Header;

    fn vp8_packet(seq: u16, timestamp: u32, frame: &[u8]) -> Packet {
        let mut payload = BytesMut::new();
        // Payload descriptor: start of partition 0.
        payload.put_u8(0x10);
        payload.extend_from_slice(frame);
        Packet {
            header: Header {
                version: 2,
                marker: true,
                payload_type: 96,
                sequence_number: seq,
                timestamp,
                ssrc: 1234,
                ..Default::default()
            },
            payload: payload.freeze(),
        }
    }

    #[test]
    fn test_vp8_frames_are_reassembled_in_order() {
        let mut assembler = FrameAssembler::new(Codec::Vp8);
        assert_eq!(assembler.codec(), Codec::Vp8);

        let originals: Vec<Vec<u8>> = (0..6).map(|i| synthetic_vp8_frame(i, i == 0)).collect();
        let mut frames = Vec::new();
        for (i, data) in originals.iter().enumerate() {
            let packet = vp8_packet(100 + i as u16, 3000 * i as u32, data);
            frames.extend(assembler.push(packet));
        }

        assert!(!frames.is_empty());
        let first = &frames[0];
        assert_eq!(first.codec, Codec::Vp8);
        assert_eq!(first.data, Bytes::from(originals[0].clone()));
        assert!(first.keyframe);
        for pair in frames.windows(2) {
            assert!(pair[0].timestamp_us < pair[1].timestamp_us);
        }
        if let Some(second) = frames.get(1) {
            assert!(!second.keyframe);
            assert_eq!(second.timestamp_us, 33_333);
        }
    }
}
