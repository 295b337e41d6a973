//! The single outgoing peer connection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use camlink_common::{SdpPayload, SignalMessage};
use camlink_media::DEFAULT_FRAME_DURATION;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::signaling::SignalingClient;
use crate::stream::LocalStream;

struct ActivePeer {
    pc: Arc<RTCPeerConnection>,
    pump: JoinHandle<()>,
}

pub struct Publisher {
    api: API,
    ice_servers: Vec<String>,
    active: Option<ActivePeer>,
}

impl Publisher {
    pub fn new(ice_servers: Vec<String>) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            api,
            ice_servers,
            active: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Creates a fresh peer connection carrying `stream` and sends the offer.
    /// Any previous connection is torn down first.
    pub async fn start(
        &mut self,
        stream: Option<&LocalStream>,
        signaling: &SignalingClient,
    ) -> Result<()> {
        let Some(stream) = stream else {
            return Err(anyhow!("no local camera stream to transmit"));
        };
        self.stop().await;

        info!(device = %stream.device().display_label(), "creating peer connection");
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_configuration()).await?);
        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            info!(%state, "publisher connection state changed");
            Box::pin(async {})
        }));

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: stream.codec().mime_type().to_string(),
                ..Default::default()
            },
            "video".to_string(),
            format!("camlink-{}", short_id(&stream.device().device_id)),
        ));
        let pump = tokio::spawn(pump_frames(Arc::clone(&track), stream.clone()));
        self.active = Some(ActivePeer {
            pc: Arc::clone(&pc),
            pump,
        });

        if let Err(e) = negotiate(&pc, track, signaling).await {
            self.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Applies the receiver's answer to the current peer connection.
    pub async fn apply_answer(&self, payload: &SdpPayload) {
        let Some(active) = self.active.as_ref() else {
            debug!("answer received without an active peer connection; ignoring");
            return;
        };
        info!("answer received; setting remote description");
        let result = match RTCSessionDescription::answer(payload.sdp.clone()) {
            Ok(description) => active.pc.set_remote_description(description).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("failed to set remote description: {}", e);
        }
    }

    /// Removes every sender and closes the peer connection. No-op when idle.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        warn!("closing peer connection and releasing its tracks");
        active.pump.abort();
        for sender in active.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                debug!("sender stop: {}", e);
            }
            if let Err(e) = active.pc.remove_track(&sender).await {
                debug!("remove track: {}", e);
            }
        }
        if let Err(e) = active.pc.close().await {
            warn!("error closing peer connection: {}", e);
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

async fn negotiate(
    pc: &Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    signaling: &SignalingClient,
) -> Result<()> {
    let sender = pc
        .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
        .await?;
    // Drain RTCP so interceptors (NACK, reports) keep running.
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while let Ok((_, _)) = sender.read(&mut buf).await {}
    });

    let offer = pc.create_offer(None).await?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await?;
    // Non-trickle: the offer goes out with every candidate inlined.
    let _ = gather_complete.recv().await;

    let local = pc
        .local_description()
        .await
        .ok_or_else(|| anyhow!("no local description after gathering"))?;
    info!("sending offer ({} bytes)", local.sdp.len());
    signaling.send(&SignalMessage::offer(local.sdp))?;
    Ok(())
}

/// Untimed frames (parameter sets, SEI) sent back to back before a pause is
/// forced anyway.
const MAX_UNTIMED_RUN: u32 = 32;

/// Deadline bookkeeping for the frame pump.
struct Pacer {
    deadline: Instant,
    untimed_run: u32,
}

impl Pacer {
    fn new(start: Instant) -> Self {
        Self {
            deadline: start,
            untimed_run: 0,
        }
    }

    /// When to send the next frame after one lasting `duration`; `None`
    /// means send right away.
    fn after_frame(&mut self, duration: Duration) -> Option<Instant> {
        if duration.is_zero() {
            self.untimed_run += 1;
            if self.untimed_run < MAX_UNTIMED_RUN {
                return None;
            }
            self.untimed_run = 0;
            self.deadline += DEFAULT_FRAME_DURATION;
            return Some(self.deadline);
        }
        self.untimed_run = 0;
        self.deadline += duration;
        Some(self.deadline)
    }
}

/// Feeds the capture into the track at the source's own pace.
async fn pump_frames(track: Arc<TrackLocalStaticSample>, stream: LocalStream) {
    let mut pacer = Pacer::new(Instant::now());
    let mut sent: u64 = 0;
    loop {
        let frame = match stream.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(sent, "capture stopped; frame pump exiting");
                break;
            }
            Err(e) => {
                error!("capture read failed: {:#}", e);
                break;
            }
        };
        let duration = frame.duration;
        let sample = Sample {
            data: frame.data,
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("write sample: {}", e);
        }
        sent += 1;

        match pacer.after_frame(duration) {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => tokio::task::yield_now().await,
        }
    }
}

fn short_id(device_id: &str) -> String {
    device_id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_frames_advance_the_deadline() {
        let start = Instant::now();
        let mut pacer = Pacer::new(start);
        let frame = Duration::from_millis(33);
        assert_eq!(pacer.after_frame(frame), Some(start + frame));
        assert_eq!(pacer.after_frame(frame), Some(start + frame * 2));
    }

    #[test]
    fn test_untimed_runs_are_eventually_paced() {
        let start = Instant::now();
        let mut pacer = Pacer::new(start);
        for _ in 1..MAX_UNTIMED_RUN {
            assert_eq!(pacer.after_frame(Duration::ZERO), None);
        }
        assert_eq!(
            pacer.after_frame(Duration::ZERO),
            Some(start + DEFAULT_FRAME_DURATION)
        );
        // The run starts over after a forced pause.
        assert_eq!(pacer.after_frame(Duration::ZERO), None);
    }

    #[test]
    fn test_timed_frame_resets_untimed_run() {
        let start = Instant::now();
        let mut pacer = Pacer::new(start);
        for _ in 1..MAX_UNTIMED_RUN {
            pacer.after_frame(Duration::ZERO);
        }
        let frame = Duration::from_millis(40);
        assert_eq!(pacer.after_frame(frame), Some(start + frame));
        assert_eq!(pacer.after_frame(Duration::ZERO), None);
    }
}
