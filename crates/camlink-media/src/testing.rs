//! Synthetic capture files for offline testing.
//!
//! The payloads are not decodable video; they only carry valid container
//! framing and the header bits keyframe detection looks at.

use std::path::Path;

use anyhow::Result;

const IVF_HEADER_LEN: u16 = 32;

/// IVF/VP8 stream of `frames` frames at `fps`; every 30th frame is a keyframe.
pub fn synthetic_ivf(frames: u32, fps: u32) -> Vec<u8> {
    let timestamps: Vec<u64> = (0..frames as u64).collect();
    synthetic_ivf_with_timebase(1, fps, &timestamps)
}

/// IVF/VP8 stream with an explicit timebase and one frame per timestamp.
pub fn synthetic_ivf_with_timebase(numerator: u32, denominator: u32, timestamps: &[u64]) -> Vec<u8> {
    let frames = timestamps.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"DKIF");
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&IVF_HEADER_LEN.to_le_bytes());
    out.extend_from_slice(b"VP80");
    out.extend_from_slice(&640u16.to_le_bytes());
    out.extend_from_slice(&480u16.to_le_bytes());
    out.extend_from_slice(&denominator.to_le_bytes());
    out.extend_from_slice(&numerator.to_le_bytes());
    out.extend_from_slice(&frames.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    for (index, timestamp) in (0..frames).zip(timestamps) {
        let payload = synthetic_vp8_frame(index, index % 30 == 0);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(&payload);
    }
    out
}

pub fn write_synthetic_ivf(path: &Path, frames: u32, fps: u32) -> Result<()> {
    std::fs::write(path, synthetic_ivf(frames, fps))?;
    Ok(())
}

/// VP8-shaped payload: frame tag, then a pattern that varies per frame.
pub fn synthetic_vp8_frame(index: u32, keyframe: bool) -> Vec<u8> {
    let mut data = vec![if keyframe { 0x10 } else { 0x11 }, 0x02, 0x00];
    if keyframe {
        // Start code and 640x480 dimensions, as in a real key frame header.
        data.extend_from_slice(&[0x9d, 0x01, 0x2a, 0x80, 0x02, 0xe0, 0x01]);
    }
    let base = (index % 256) as u8;
    data.extend((0..200u32).map(|i| base.wrapping_add((i % 256) as u8)));
    data
}

/// Annex-B H264 stream: SPS, PPS, one IDR slice and `slices - 1` P slices.
pub fn synthetic_h264(slices: u32) -> Vec<u8> {
    let start = [0u8, 0, 0, 1];
    let mut out = Vec::new();
    out.extend_from_slice(&start);
    out.extend_from_slice(&[0x67, 0x42, 0xc0, 0x1f, 0xd9, 0x00, 0x78]);
    out.extend_from_slice(&start);
    out.extend_from_slice(&[0x68, 0xcb, 0x83, 0xcb, 0x20]);
    for index in 0..slices {
        out.extend_from_slice(&start);
        out.push(if index == 0 { 0x65 } else { 0x41 });
        out.extend((0..64u32).map(|i| ((index + i) % 250) as u8 + 2));
    }
    out
}
