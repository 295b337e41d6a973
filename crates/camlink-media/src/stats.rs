use std::time::{Duration, Instant};

use crate::EncodedFrame;

/// Throughput over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub window: Duration,
    pub frames: u64,
    pub keyframes: u64,
    pub fps: f64,
    pub kbps: f64,
    pub total_frames: u64,
    pub total_dropped: u64,
}

/// Rolling frame counter for received or sent video.
#[derive(Debug)]
pub struct FrameStats {
    interval: Duration,
    window_start: Instant,
    frames: u64,
    keyframes: u64,
    bytes: u64,
    total_frames: u64,
    total_dropped: u64,
}

impl FrameStats {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            frames: 0,
            keyframes: 0,
            bytes: 0,
            total_frames: 0,
            total_dropped: 0,
        }
    }

    pub fn record(&mut self, frame: &EncodedFrame) {
        self.frames += 1;
        self.total_frames += 1;
        self.bytes += frame.data.len() as u64;
        if frame.keyframe {
            self.keyframes += 1;
        }
    }

    /// Drop count reported by the producer (cumulative).
    pub fn set_dropped(&mut self, total_dropped: u64) {
        self.total_dropped = total_dropped;
    }

    /// Closes the window and returns its report once `interval` has passed.
    pub fn take_report(&mut self, now: Instant) -> Option<StatsReport> {
        let window = now.saturating_duration_since(self.window_start);
        if window < self.interval || window.is_zero() {
            return None;
        }
        let secs = window.as_secs_f64();
        let report = StatsReport {
            window,
            frames: self.frames,
            keyframes: self.keyframes,
            fps: self.frames as f64 / secs,
            kbps: (self.bytes * 8) as f64 / 1000.0 / secs,
            total_frames: self.total_frames,
            total_dropped: self.total_dropped,
        };
        self.window_start = now;
        self.frames = 0;
        self.keyframes = 0;
        self.bytes = 0;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Codec;
    use bytes::Bytes;

    fn frame(len: usize, keyframe: bool) -> EncodedFrame {
        EncodedFrame {
            codec: Codec::Vp8,
            timestamp_us: 0,
            duration: Duration::from_millis(33),
            keyframe,
            data: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn test_no_report_before_interval() {
        let start = Instant::now();
        let mut stats = FrameStats::new(Duration::from_secs(5), start);
        stats.record(&frame(100, true));
        assert!(stats.take_report(start + Duration::from_secs(4)).is_none());
    }

    #[test]
    fn test_report_rates_and_reset() {
        let start = Instant::now();
        let mut stats = FrameStats::new(Duration::from_secs(2), start);
        for i in 0..60 {
            stats.record(&frame(1000, i % 30 == 0));
        }
        stats.set_dropped(3);

        let report = stats.take_report(start + Duration::from_secs(2)).unwrap();
        assert_eq!(report.frames, 60);
        assert_eq!(report.keyframes, 2);
        assert!((report.fps - 30.0).abs() < 1e-9);
        // 60 * 1000 bytes * 8 bits / 2 s = 240 kbps
        assert!((report.kbps - 240.0).abs() < 1e-9);
        assert_eq!(report.total_dropped, 3);

        let next = stats.take_report(start + Duration::from_secs(4)).unwrap();
        assert_eq!(next.frames, 0);
        assert_eq!(next.total_frames, 60);
    }
}
