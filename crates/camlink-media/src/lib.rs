#![forbid(unsafe_code)]

use std::time::Duration;

use bytes::Bytes;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_VP8};

pub mod assembler;
pub mod device;
pub mod recorder;
pub mod source;
pub mod stats;
pub mod testing;

pub use assembler::FrameAssembler;
pub use device::{CaptureDevice, DeviceProvider, FileDeviceProvider};
pub use recorder::{RecorderConfig, RtpRecorder};
pub use source::{FrameSource, H264FileSource, IvfFileSource};
pub use stats::{FrameStats, StatsReport};

/// RTP clock rate shared by every video codec we carry.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Frame pacing used when a source carries no timing of its own.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Vp8,
    H264,
}

impl Codec {
    pub fn mime_type(self) -> &'static str {
        match self {
            Codec::Vp8 => MIME_TYPE_VP8,
            Codec::H264 => MIME_TYPE_H264,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.eq_ignore_ascii_case(MIME_TYPE_VP8) {
            Some(Codec::Vp8)
        } else if mime.eq_ignore_ascii_case(MIME_TYPE_H264) {
            Some(Codec::H264)
        } else {
            None
        }
    }

    /// Extension of the on-disk container for this codec.
    pub fn file_extension(self) -> &'static str {
        match self {
            Codec::Vp8 => "ivf",
            Codec::H264 => "h264",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ivf" => Some(Codec::Vp8),
            "h264" | "264" => Some(Codec::H264),
            _ => None,
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// One compressed video frame (VP8 frame or H264 access unit / NAL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub codec: Codec,
    pub timestamp_us: u64,
    pub duration: Duration,
    pub keyframe: bool,
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn new(codec: Codec, data: Bytes, timestamp_us: u64, duration: Duration) -> Self {
        let keyframe = is_keyframe(codec, &data);
        Self {
            codec,
            timestamp_us,
            duration,
            keyframe,
            data,
        }
    }
}

/// Inspects the bitstream header for an intra frame.
pub fn is_keyframe(codec: Codec, data: &[u8]) -> bool {
    match codec {
        // VP8 frame tag: bit 0 is the inverse key-frame flag.
        Codec::Vp8 => data.first().is_some_and(|b| b & 0x01 == 0),
        Codec::H264 => h264_nal_types(data)
            .into_iter()
            .any(|nal_type| nal_type == 5 || nal_type == 7),
    }
}

/// NAL unit types in an Annex-B buffer, or of a single bare NAL unit.
fn h264_nal_types(data: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(header) = data.get(i + 3) {
                types.push(header & 0x1f);
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    if types.is_empty() {
        if let Some(header) = data.first() {
            types.push(header & 0x1f);
        }
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_mime_round_trip() {
        for codec in [Codec::Vp8, Codec::H264] {
            assert_eq!(Codec::from_mime(codec.mime_type()), Some(codec));
            assert_eq!(Codec::from_extension(codec.file_extension()), Some(codec));
        }
        assert_eq!(Codec::from_mime("video/vp8"), Some(Codec::Vp8));
        assert_eq!(Codec::from_mime("audio/opus"), None);
        assert_eq!(Codec::from_extension("mp4"), None);
    }

    #[test]
    fn test_vp8_keyframe_flag() {
        assert!(is_keyframe(Codec::Vp8, &[0x10, 0x02, 0x00]));
        assert!(!is_keyframe(Codec::Vp8, &[0x11, 0x02, 0x00]));
        assert!(!is_keyframe(Codec::Vp8, &[]));
    }

    #[test]
    fn test_h264_keyframe_detection() {
        // SPS in Annex-B followed by a non-IDR slice
        let annex_b = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x41, 0x9a];
        assert!(is_keyframe(Codec::H264, &annex_b));

        let p_slice = [0, 0, 0, 1, 0x41, 0x9a];
        assert!(!is_keyframe(Codec::H264, &p_slice));

        // Bare IDR NAL without start code
        assert!(is_keyframe(Codec::H264, &[0x65, 0x88]));
    }
}
