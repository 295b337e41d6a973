//! One WebRTC peer connection per signaling client, receiving its camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Result};
use camlink_common::SdpPayload;
use camlink_media::{Codec, FrameAssembler, RecorderConfig, RtpRecorder};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::display::FrameSender;

/// Shared by every receiver: the WebRTC API and where frames go.
pub struct ReceiverContext {
    api: API,
    ice_servers: Vec<String>,
    frames: FrameSender,
    recorder: Option<RecorderConfig>,
    pli_interval: Duration,
}

impl ReceiverContext {
    pub fn new(
        ice_servers: Vec<String>,
        frames: FrameSender,
        recorder: Option<RecorderConfig>,
        pli_interval: Duration,
    ) -> Result<Self> {
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
            frames,
            recorder,
            pli_interval,
        })
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

pub struct Receiver {
    connection_id: Uuid,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl Receiver {
    pub async fn new(ctx: &ReceiverContext, connection_id: Uuid) -> Result<Self> {
        let pc = Arc::new(ctx.api.new_peer_connection(ctx.rtc_configuration()).await?);

        let weak = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(%connection_id, %state, "peer connection state changed");
            if state == RTCPeerConnectionState::Failed {
                if let Some(pc) = weak.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = pc.close().await {
                            debug!(%connection_id, "close after failure: {}", e);
                        }
                    });
                }
            }
            Box::pin(async {})
        }));

        let frames = ctx.frames.clone();
        let recorder = ctx.recorder.clone();
        let pli_interval = ctx.pli_interval;
        let weak = Arc::downgrade(&pc);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let frames = frames.clone();
            let recorder = recorder.clone();
            let pc = weak.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    info!(%connection_id, kind = %track.kind(), "ignoring non-video track");
                    return;
                }
                let sink = TrackSink {
                    connection_id,
                    frames,
                    recorder,
                    pli_interval,
                };
                tokio::spawn(consume_track(track, sink, pc));
            })
        }));

        Ok(Self {
            connection_id,
            pc,
            closed: AtomicBool::new(false),
        })
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Answers a remote offer. Returns `None` when the offer is ignored or
    /// negotiation failed; a failure also closes this receiver.
    pub async fn handle_offer(&self, offer: &SdpPayload) -> Option<SdpPayload> {
        let state = self.pc.signaling_state();
        if state != RTCSignalingState::Stable {
            warn!(
                connection_id = %self.connection_id,
                %state,
                "ignoring offer while signaling state is not stable"
            );
            return None;
        }

        match self.negotiate(offer).await {
            Ok(answer) => Some(answer),
            Err(e) => {
                error!(connection_id = %self.connection_id, "failed to handle offer: {:#}", e);
                self.close().await;
                None
            }
        }
    }

    async fn negotiate(&self, offer: &SdpPayload) -> Result<SdpPayload> {
        if !offer.kind.eq_ignore_ascii_case("offer") {
            return Err(anyhow!("expected an offer description, got {:?}", offer.kind));
        }
        let description = RTCSessionDescription::offer(offer.sdp.clone())?;
        self.pc.set_remote_description(description).await?;

        let answer = self.pc.create_answer(None).await?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        // Candidates are inlined into the answer; there is no trickle channel.
        let _ = gather_complete.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("no local description after negotiation"))?;
        debug!(connection_id = %self.connection_id, "answer ready ({} bytes)", local.sdp.len());
        Ok(SdpPayload::new(local.sdp, local.sdp_type.to_string()))
    }

    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.pc.connection_state() == RTCPeerConnectionState::Closed {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!(connection_id = %self.connection_id, "error closing peer connection: {}", e);
        } else {
            info!(connection_id = %self.connection_id, "receiver closed");
        }
    }
}

struct TrackSink {
    connection_id: Uuid,
    frames: FrameSender,
    recorder: Option<RecorderConfig>,
    pli_interval: Duration,
}

async fn consume_track(track: Arc<TrackRemote>, sink: TrackSink, pc: Weak<RTCPeerConnection>) {
    let connection_id = sink.connection_id;
    let mime_type = track.codec().capability.mime_type;
    let ssrc = track.ssrc();
    let Some(codec) = Codec::from_mime(&mime_type) else {
        warn!(%connection_id, %mime_type, "unsupported video codec; ignoring track");
        return;
    };
    info!(%connection_id, %codec, ssrc, "receiving video track");

    let pli_task = tokio::spawn(send_picture_loss(pc, ssrc, sink.pli_interval));

    let mut recorder = match sink.recorder.as_ref() {
        Some(config) => match RtpRecorder::new(config, codec, ssrc) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                warn!(%connection_id, "recording disabled for this track: {:#}", e);
                None
            }
        },
        None => None,
    };

    let mut assembler = FrameAssembler::new(codec);
    let mut packets: u64 = 0;
    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _attributes)) => packet,
            Err(e) => {
                info!(%connection_id, packets, "video track ended: {}", e);
                break;
            }
        };
        packets += 1;

        let written = match recorder.as_mut() {
            Some(recorder) => recorder.write(&packet),
            None => Ok(()),
        };
        if let Err(e) = written {
            warn!(%connection_id, "stopping recording: {:#}", e);
            recorder = None;
        }

        for frame in assembler.push(packet) {
            sink.frames.push(frame);
        }
    }

    pli_task.abort();
    if let Some(recorder) = recorder {
        if let Err(e) = recorder.close() {
            warn!(%connection_id, "failed to finalize recording: {:#}", e);
        }
    }
}

/// Keeps asking the sender for keyframes so a late joiner or a lossy link
/// recovers quickly.
async fn send_picture_loss(pc: Weak<RTCPeerConnection>, media_ssrc: u32, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let Some(pc) = pc.upgrade() else {
            break;
        };
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        if let Err(e) = pc.write_rtcp(&[Box::new(pli)]).await {
            debug!("picture loss indication not sent: {}", e);
            break;
        }
    }
}
