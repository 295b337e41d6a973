//! Receiving side of Camlink: a WSS signaling endpoint that answers WebRTC
//! offers and consumes the published camera stream.

#![forbid(unsafe_code)]

pub mod config;
pub mod discovery;
pub mod display;
pub mod receiver;
pub mod server;
pub mod signaling;
pub mod tls;

pub use config::{ServerConfig, TlsFiles};
pub use display::{frame_queue, run_display_loop, DisplaySummary, FrameReceiver, FrameSender};
pub use receiver::{Receiver, ReceiverContext};
pub use server::SignalingServer;
pub use signaling::{ReceiverRegistry, WELCOME_MESSAGE};
pub use tls::{load_server_tls, ServerTls};
