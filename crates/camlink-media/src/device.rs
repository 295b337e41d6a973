//! Capture device enumeration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::source::{open_file_source, FrameSource};
use crate::{Codec, DEFAULT_FRAME_DURATION};

/// A selectable video input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub device_id: String,
    pub label: String,
    pub codec: Codec,
    pub path: PathBuf,
}

impl CaptureDevice {
    /// Label shown to the user; falls back to a short form of the id.
    pub fn display_label(&self) -> String {
        if self.label.trim().is_empty() {
            let short: String = self.device_id.chars().take(8).collect();
            format!("Camera {short}")
        } else {
            self.label.clone()
        }
    }
}

pub trait DeviceProvider: Send + Sync {
    fn enumerate(&self) -> Result<Vec<CaptureDevice>>;

    fn open(&self, device: &CaptureDevice) -> Result<Box<dyn FrameSource>>;

    fn find(&self, device_id: &str) -> Result<CaptureDevice> {
        self.enumerate()?
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| anyhow!("unknown capture device: {device_id}"))
    }
}

/// Treats every `.ivf` / `.h264` file in a directory as a camera.
#[derive(Debug, Clone)]
pub struct FileDeviceProvider {
    dir: PathBuf,
    frame_duration: Duration,
}

impl FileDeviceProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frame_duration: DEFAULT_FRAME_DURATION,
        }
    }

    /// Pacing for sources without their own timebase (H264).
    pub fn with_fps(mut self, fps: u32) -> Self {
        if fps > 0 {
            self.frame_duration = Duration::from_nanos(1_000_000_000 / fps as u64);
        }
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DeviceProvider for FileDeviceProvider {
    fn enumerate(&self) -> Result<Vec<CaptureDevice>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read capture directory {}", self.dir.display()))?;

        let mut devices = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(codec) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(Codec::from_extension)
            else {
                debug!(path = %path.display(), "skipping non-video file");
                continue;
            };
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            devices.push(CaptureDevice {
                device_id: device_id_for(&file_name),
                label,
                codec,
                path,
            });
        }
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(devices)
    }

    fn open(&self, device: &CaptureDevice) -> Result<Box<dyn FrameSource>> {
        open_file_source(&device.path, self.frame_duration)
    }
}

/// Stable id derived from the file name, so it survives restarts.
fn device_id_for(file_name: &str) -> String {
    let digest = Sha256::digest(file_name.as_bytes());
    hex::encode(&digest[..16])
}
