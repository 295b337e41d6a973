#![forbid(unsafe_code)]

pub mod connectivity;
pub mod discovery;
pub mod panel;
pub mod publisher;
pub mod signaling;
pub mod stream;
pub mod tls;
pub mod types;

pub use connectivity::check_trust_page;
pub use discovery::{discover_receiver, DiscoveredReceiver};
pub use panel::{ControlPanel, PanelStatus};
pub use publisher::Publisher;
pub use signaling::{hint_for_close, SignalingClient, SignalingEvent};
pub use stream::LocalStream;
pub use tls::TrustPolicy;
pub use types::{
    ClientConfig, ConnectionHint, HintLevel, ReadyState, ReconnectPolicy, TestResult,
};
