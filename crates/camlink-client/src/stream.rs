use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use camlink_media::{CaptureDevice, Codec, DeviceProvider, EncodedFrame, FrameSource};
use tracing::info;

/// An opened capture device. Clones share the same source; stopping any
/// clone ends the stream for all of them.
#[derive(Clone)]
pub struct LocalStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    device: CaptureDevice,
    codec: Codec,
    source: Mutex<Box<dyn FrameSource>>,
    stopped: AtomicBool,
}

impl LocalStream {
    pub fn open(provider: &dyn DeviceProvider, device: CaptureDevice) -> Result<Self> {
        let source = provider.open(&device)?;
        let codec = source.codec();
        info!(device = %device.display_label(), %codec, "capture started");
        Ok(Self {
            inner: Arc::new(StreamInner {
                device,
                codec,
                source: Mutex::new(source),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn device(&self) -> &CaptureDevice {
        &self.inner.device
    }

    pub fn codec(&self) -> Codec {
        self.inner.codec
    }

    pub fn is_live(&self) -> bool {
        !self.inner.stopped.load(Ordering::Acquire)
    }

    /// Next frame, or `None` once the stream has been stopped.
    pub fn next_frame(&self) -> Result<Option<EncodedFrame>> {
        if !self.is_live() {
            return Ok(None);
        }
        let mut source = self
            .inner
            .source
            .lock()
            .map_err(|_| anyhow!("capture source lock poisoned"))?;
        source.next_frame().map(Some)
    }

    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            info!(device = %self.inner.device.display_label(), "capture stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_media::testing::write_synthetic_ivf;
    use camlink_media::FileDeviceProvider;

    #[test]
    fn test_stop_ends_every_clone() {
        let dir = tempfile::tempdir().unwrap();
        write_synthetic_ivf(&dir.path().join("desk.ivf"), 3, 30).unwrap();
        let provider = FileDeviceProvider::new(dir.path());
        let device = provider.enumerate().unwrap().remove(0);

        let stream = LocalStream::open(&provider, device).unwrap();
        let clone = stream.clone();
        assert_eq!(stream.codec(), Codec::Vp8);
        assert!(clone.next_frame().unwrap().unwrap().keyframe);

        stream.stop();
        assert!(!clone.is_live());
        assert!(clone.next_frame().unwrap().is_none());
    }
}
