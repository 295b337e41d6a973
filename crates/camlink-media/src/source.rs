//! Frame sources backed by encoded video files.
//!
//! A source behaves like a live camera: it never runs dry, wrapping around
//! to the start of its file at end-of-stream.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::debug;
use webrtc::media::io::h264_reader::H264Reader;
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};

use crate::{Codec, EncodedFrame, DEFAULT_FRAME_DURATION};

const H264_READ_CAPACITY: usize = 1_048_576;

pub trait FrameSource: Send {
    fn codec(&self) -> Codec;

    /// Blocks until the next frame is read. Frames carry the duration the
    /// caller should wait before sending the next one.
    fn next_frame(&mut self) -> Result<EncodedFrame>;
}

/// Open the right source for a file based on its extension.
pub fn open_file_source(path: &Path, frame_duration: Duration) -> Result<Box<dyn FrameSource>> {
    let codec = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(Codec::from_extension)
        .ok_or_else(|| anyhow!("unsupported capture file: {}", path.display()))?;
    Ok(match codec {
        Codec::Vp8 => Box::new(IvfFileSource::open(path)?),
        Codec::H264 => Box::new(H264FileSource::open(path, frame_duration)?),
    })
}

/// VP8 frames from an IVF container.
///
/// Frame timing comes from the per-frame timestamps, which count in units of
/// the header timebase.
pub struct IvfFileSource {
    path: PathBuf,
    reader: IVFReader<BufReader<File>>,
    timebase: Option<(u64, u64)>,
    frames_since_open: u64,
    /// Added to file timestamps so time keeps moving across wrap-arounds.
    offset_us: u64,
    last_pts: Option<u64>,
    last_timestamp_us: u64,
    last_duration: Duration,
}

impl IvfFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let (reader, header) = Self::open_reader(path)?;
        let timebase = match (header.timebase_numerator, header.timebase_denominator) {
            (0, _) | (_, 0) => None,
            (numerator, denominator) => Some((numerator as u64, denominator as u64)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            timebase,
            frames_since_open: 0,
            offset_us: 0,
            last_pts: None,
            last_timestamp_us: 0,
            last_duration: DEFAULT_FRAME_DURATION,
        })
    }

    fn open_reader(path: &Path) -> Result<(IVFReader<BufReader<File>>, IVFFileHeader)> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let (reader, header) = IVFReader::new(BufReader::new(file))
            .map_err(|e| anyhow!("invalid IVF file {}: {e}", path.display()))?;
        if &header.four_cc != b"VP80" {
            return Err(anyhow!(
                "{}: only VP8 IVF files are supported (got {:?})",
                path.display(),
                String::from_utf8_lossy(&header.four_cc)
            ));
        }
        Ok((reader, header))
    }

    fn rewind(&mut self) -> Result<()> {
        let (reader, _) = Self::open_reader(&self.path)?;
        self.reader = reader;
        self.frames_since_open = 0;
        self.offset_us = self.last_timestamp_us + self.last_duration.as_micros() as u64;
        self.last_pts = None;
        Ok(())
    }

    fn ticks_to_duration(&self, ticks: u64) -> Option<Duration> {
        let (numerator, denominator) = self.timebase?;
        let nanos = ticks as u128 * numerator as u128 * 1_000_000_000 / denominator as u128;
        Some(Duration::from_nanos(u64::try_from(nanos).ok()?))
    }

    /// Timestamp and duration of a frame stamped `pts`. The duration is the
    /// gap from the previous frame; the first frame after opening reuses the
    /// last known gap.
    fn frame_timing(&mut self, pts: u64) -> (u64, Duration) {
        let Some(position) = self.ticks_to_duration(pts) else {
            let timestamp_us = match self.last_pts {
                Some(_) => self.last_timestamp_us + self.last_duration.as_micros() as u64,
                None => self.offset_us,
            };
            self.last_pts = Some(pts);
            return (timestamp_us, self.last_duration);
        };

        let duration = self
            .last_pts
            .filter(|last| pts > *last)
            .and_then(|last| self.ticks_to_duration(pts - last))
            .filter(|gap| !gap.is_zero())
            .unwrap_or(self.last_duration);
        self.last_pts = Some(pts);
        (self.offset_us + position.as_micros() as u64, duration)
    }
}

impl FrameSource for IvfFileSource {
    fn codec(&self) -> Codec {
        Codec::Vp8
    }

    fn next_frame(&mut self) -> Result<EncodedFrame> {
        let (data, header) = match self.reader.parse_next_frame() {
            Ok(frame) => frame,
            Err(err) if self.frames_since_open > 0 => {
                debug!(path = %self.path.display(), "capture file wrapped: {err}");
                self.rewind()?;
                self.reader
                    .parse_next_frame()
                    .map_err(|e| anyhow!("{}: {e}", self.path.display()))?
            }
            Err(err) => return Err(anyhow!("no frames in {}: {err}", self.path.display())),
        };
        self.frames_since_open += 1;

        let (timestamp_us, duration) = self.frame_timing(header.timestamp);
        self.last_timestamp_us = timestamp_us;
        self.last_duration = duration;
        Ok(EncodedFrame::new(
            Codec::Vp8,
            data.freeze(),
            timestamp_us,
            duration,
        ))
    }
}

/// H264 NAL units from an Annex-B elementary stream.
pub struct H264FileSource {
    path: PathBuf,
    reader: H264Reader<BufReader<File>>,
    frame_duration: Duration,
    nals_since_open: u64,
    timestamp_us: u64,
}

impl H264FileSource {
    pub fn open(path: &Path, frame_duration: Duration) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            reader: Self::open_reader(path)?,
            frame_duration,
            nals_since_open: 0,
            timestamp_us: 0,
        })
    }

    fn open_reader(path: &Path) -> Result<H264Reader<BufReader<File>>> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        Ok(H264Reader::new(BufReader::new(file), H264_READ_CAPACITY))
    }
}

impl FrameSource for H264FileSource {
    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn next_frame(&mut self) -> Result<EncodedFrame> {
        let nal = match self.reader.next_nal() {
            Ok(nal) => nal,
            Err(err) if self.nals_since_open > 0 => {
                debug!(path = %self.path.display(), "capture file wrapped: {err}");
                self.reader = Self::open_reader(&self.path)?;
                self.nals_since_open = 0;
                self.reader
                    .next_nal()
                    .map_err(|e| anyhow!("{}: {e}", self.path.display()))?
            }
            Err(err) => return Err(anyhow!("no NAL units in {}: {err}", self.path.display())),
        };
        self.nals_since_open += 1;

        let data = nal.data.freeze();
        // Parameter sets and SEI share the timestamp of the slice that follows.
        let nal_type = data
            .iter()
            .position(|b| *b != 0)
            .and_then(|start| match data.get(start) {
                Some(1) => data.get(start + 1),
                other => other,
            })
            .map(|header| header & 0x1f)
            .unwrap_or(0);
        let duration = if (1..=5).contains(&nal_type) {
            self.frame_duration
        } else {
            Duration::ZERO
        };

        let frame = EncodedFrame::new(Codec::H264, data, self.timestamp_us, duration);
        self.timestamp_us += duration.as_micros() as u64;
        Ok(frame)
    }
}
