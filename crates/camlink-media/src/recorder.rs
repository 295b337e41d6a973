use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::Local;
use tracing::info;
use webrtc::media::io::h264_writer::H264Writer;
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::Writer;
use webrtc::rtp::packet::Packet;

use crate::Codec;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub filename_prefix: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            filename_prefix: String::from("camlink"),
        }
    }
}

/// Writes the RTP stream of one remote track to disk without decoding it.
pub struct RtpRecorder {
    path: PathBuf,
    writer: Box<dyn Writer + Send + Sync>,
    packets: u64,
}

impl RtpRecorder {
    pub fn new(config: &RecorderConfig, codec: Codec, ssrc: u32) -> Result<Self> {
        if !config.output_dir.exists() {
            std::fs::create_dir_all(&config.output_dir)?;
        }
        let path = config.output_dir.join(recording_file_name(
            &config.filename_prefix,
            codec,
            ssrc,
        ));
        let file = BufWriter::new(File::create(&path)?);

        let writer: Box<dyn Writer + Send + Sync> = match codec {
            Codec::Vp8 => Box::new(
                IVFWriter::new(file, &vp8_file_header())
                    .map_err(|e| anyhow!("create IVF writer: {e}"))?,
            ),
            Codec::H264 => Box::new(H264Writer::new(file)),
        };

        info!(path = %path.display(), %codec, "recording remote track");
        Ok(Self {
            path,
            writer,
            packets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    pub fn write(&mut self, packet: &Packet) -> Result<()> {
        self.writer
            .write_rtp(packet)
            .map_err(|e| anyhow!("write {}: {e}", self.path.display()))?;
        self.packets += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.writer
            .close()
            .map_err(|e| anyhow!("close {}: {e}", self.path.display()))?;
        info!(
            path = %self.path.display(),
            packets = self.packets,
            "recording finished"
        );
        Ok(())
    }
}

// Width/height are informational in IVF; decoders read them from the key frame.
fn vp8_file_header() -> IVFFileHeader {
    IVFFileHeader {
        signature: *b"DKIF",
        version: 0,
        header_size: 32,
        four_cc: *b"VP80",
        width: 640,
        height: 480,
        timebase_denominator: 30,
        timebase_numerator: 1,
        num_frames: 900,
        unused: 0,
    }
}

fn recording_file_name(prefix: &str, codec: Codec, ssrc: u32) -> String {
    format!(
        "{}-{}-{:08x}.{}",
        prefix,
        Local::now().format("%Y%m%d-%H%M%S"),
        ssrc,
        codec.file_extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_file_name_shape() {
        let name = recording_file_name("cam", Codec::Vp8, 0xabc);
        assert!(name.starts_with("cam-"));
        assert!(name.ends_with("-00000abc.ivf"));

        let name = recording_file_name("cam", Codec::H264, 1);
        assert!(name.ends_with(".h264"));
    }

    #[test]
    fn test_recorder_creates_output_dir_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            output_dir: dir.path().join("nested/recordings"),
            filename_prefix: "test".into(),
        };
        let recorder = RtpRecorder::new(&config, Codec::Vp8, 42).unwrap();
        let path = recorder.path().to_path_buf();
        assert_eq!(recorder.packets_written(), 0);
        recorder.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"DKIF"));
    }
}
