//! Frame queue between the receivers and the main task, and the loop that
//! drains it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_media::{EncodedFrame, FrameStats, StatsReport};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info};

/// How long the display loop waits for a frame before re-checking state.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Producer half of the frame queue. Never blocks: a full queue drops the
/// frame and counts it.
#[derive(Clone, Debug)]
pub struct FrameSender {
    tx: mpsc::Sender<EncodedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Returns `false` when the frame was dropped.
    pub fn push(&self, frame: EncodedFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "frame queue full; dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct FrameReceiver {
    rx: mpsc::Receiver<EncodedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameReceiver {
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        self.rx.recv().await
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        FrameSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        FrameReceiver { rx, dropped },
    )
}

/// Totals for the whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySummary {
    pub frames: u64,
    pub keyframes: u64,
    pub dropped: u64,
}

/// Consumes frames until `shutdown` resolves or every sender is gone,
/// logging throughput every `stats_interval`.
pub async fn run_display_loop<F>(
    mut frames: FrameReceiver,
    stats_interval: Duration,
    shutdown: F,
) -> DisplaySummary
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut stats = FrameStats::new(stats_interval, Instant::now());
    let mut summary = DisplaySummary::default();
    let mut first_frame = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested; leaving display loop");
                break;
            }
            next = time::timeout(POLL_INTERVAL, frames.recv()) => match next {
                Ok(Some(frame)) => {
                    summary.frames += 1;
                    if frame.keyframe {
                        summary.keyframes += 1;
                    }
                    if first_frame {
                        info!(codec = %frame.codec, bytes = frame.data.len(), "first frame received");
                        first_frame = false;
                    }
                    stats.record(&frame);
                }
                Ok(None) => {
                    debug!("frame queue closed");
                    break;
                }
                Err(_) => {}
            }
        }

        stats.set_dropped(frames.dropped());
        if let Some(report) = stats.take_report(Instant::now()) {
            log_report(&report);
        }
    }

    summary.dropped = frames.dropped();
    summary
}

fn log_report(report: &StatsReport) {
    if report.frames == 0 {
        debug!(total = report.total_frames, "no frames this window");
        return;
    }
    info!(
        fps = format!("{:.1}", report.fps),
        kbps = format!("{:.0}", report.kbps),
        keyframes = report.keyframes,
        total = report.total_frames,
        dropped = report.total_dropped,
        "receiving video"
    );
}
