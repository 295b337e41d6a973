//! Control panel state machine. Each public operation corresponds to one
//! button of the publishing UI.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use camlink_common::{PanelEvent, SignalMessage};
use camlink_media::{CaptureDevice, DeviceProvider};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connectivity;
use crate::publisher::Publisher;
use crate::signaling::{hint_for_close, SignalingClient, SignalingEvent};
use crate::stream::LocalStream;
use crate::types::{ClientConfig, ConnectionHint, ReadyState, TestResult};

/// Read-only view of the panel for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelStatus {
    pub server: Option<String>,
    pub ready_state: ReadyState,
    pub hint: Option<ConnectionHint>,
    pub test: Option<TestResult>,
    pub camera_on: bool,
    pub devices: Vec<CaptureDevice>,
    pub selected_device: Option<String>,
    pub streaming: bool,
    pub peer_active: bool,
}

pub struct ControlPanel {
    config: ClientConfig,
    provider: Arc<dyn DeviceProvider>,
    socket: Option<SignalingClient>,
    events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    hint: Option<ConnectionHint>,
    test: Option<TestResult>,
    camera_on: bool,
    devices: Vec<CaptureDevice>,
    selected_device: Option<String>,
    stream: Option<LocalStream>,
    streaming: bool,
    publisher: Publisher,
}

impl ControlPanel {
    pub fn new(config: ClientConfig, provider: Arc<dyn DeviceProvider>) -> Result<Self> {
        let publisher = Publisher::new(config.ice_servers.clone())?;
        Ok(Self {
            config,
            provider,
            socket: None,
            events: None,
            hint: None,
            test: None,
            camera_on: false,
            devices: Vec::new(),
            selected_device: None,
            stream: None,
            streaming: false,
            publisher,
        })
    }

    pub fn set_server(&mut self, host: impl Into<String>, port: Option<u16>) {
        let host = host.into().trim().to_string();
        self.config.host = (!host.is_empty()).then_some(host);
        if let Some(port) = port {
            self.config.port = port;
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.socket
            .as_ref()
            .map_or(ReadyState::Uninstantiated, SignalingClient::ready_state)
    }

    pub fn hint(&self) -> Option<&ConnectionHint> {
        self.hint.as_ref()
    }

    pub fn status(&self) -> PanelStatus {
        PanelStatus {
            server: self.config.signaling_url(),
            ready_state: self.ready_state(),
            hint: self.hint.clone(),
            test: self.test.clone(),
            camera_on: self.camera_on,
            devices: self.devices.clone(),
            selected_device: self.selected_device.clone(),
            streaming: self.streaming,
            peer_active: self.publisher.is_active(),
        }
    }

    pub fn set_tls(&mut self, tls: bool) {
        self.config.tls = tls;
    }

    /// Opens the signaling socket, replacing any existing one.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self
            .config
            .signaling_url()
            .ok_or_else(|| anyhow!("enter the server address first"))?;
        if let Some(previous) = self.socket.take() {
            debug!(url = previous.url(), "replacing existing signaling socket");
            self.events = None;
            previous.close().await;
        }

        self.test = None;
        self.hint = Some(ConnectionHint::info(format!("connecting to {url}...")));
        let (client, events) =
            SignalingClient::spawn(url, &self.config.trust, self.config.reconnect);
        self.socket = Some(client);
        self.events = Some(events);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.send_event(&PanelEvent::ManualDisconnect);
        if self.streaming {
            self.streaming = false;
            self.publisher.stop().await;
        }
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        self.events = None;
        self.hint = None;
        info!("disconnected from signaling server");
    }

    pub async fn test_connection(&mut self) -> Result<TestResult> {
        let url = self
            .config
            .trust_page_url()
            .ok_or_else(|| anyhow!("enter the server address first"))?;
        self.test = Some(TestResult::Testing { url: url.clone() });
        let result = connectivity::check_trust_page(&url, &self.config.trust, self.config.test_timeout).await;
        self.test = Some(result.clone());
        Ok(result)
    }

    pub async fn toggle_camera(&mut self) -> Result<()> {
        if self.camera_on {
            self.camera_off().await;
            return Ok(());
        }

        info!("requesting camera access");
        let devices = self.provider.enumerate()?;
        self.devices = devices;
        if let Some(first) = self.devices.first().map(|d| d.device_id.clone()) {
            if let Err(e) = self.select_device(&first, true).await {
                error!("failed to open camera: {:#}", e);
            }
        } else {
            warn!("no capture devices found");
        }
        self.camera_on = true;
        self.send_event(&PanelEvent::CameraOn);
        Ok(())
    }

    async fn camera_off(&mut self) {
        warn!("turning the camera off");
        if self.streaming {
            self.streaming = false;
            self.publisher.stop().await;
            self.send_event(&PanelEvent::StreamingStopped);
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.camera_on = false;
        self.devices.clear();
        self.selected_device = None;
        self.send_event(&PanelEvent::CameraOff);
    }

    /// Switches to another capture device.
    pub async fn change_device(&mut self, device_id: &str) -> Result<()> {
        if !self.camera_on {
            bail!("turn the camera on before choosing a device");
        }
        self.select_device(device_id, false).await
    }

    async fn select_device(&mut self, device_id: &str, initial: bool) -> Result<()> {
        self.selected_device = Some(device_id.to_string());
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }

        let device = self
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
            .map_or_else(|| self.provider.find(device_id), Ok)?;
        let stream = LocalStream::open(self.provider.as_ref(), device)?;
        self.stream = Some(stream);

        if !initial {
            self.send_event(&PanelEvent::DeviceChanged {
                device_id: device_id.to_string(),
            });
            if self.streaming {
                self.publisher.stop().await;
                tokio::time::sleep(self.config.restart_delay).await;
                self.start_publisher().await;
            }
        }
        Ok(())
    }

    pub async fn toggle_streaming(&mut self) -> Result<()> {
        if !self.camera_on {
            bail!("the camera is off; turn it on before streaming");
        }
        if !self.streaming && !self.ready_state().is_open() {
            bail!("not connected to the signaling server");
        }

        self.streaming = !self.streaming;
        if self.streaming {
            self.send_event(&PanelEvent::StreamingStarted);
            self.start_publisher().await;
        } else {
            self.send_event(&PanelEvent::StreamingStopped);
            self.publisher.stop().await;
        }
        Ok(())
    }

    async fn start_publisher(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            error!("cannot start streaming without a signaling socket");
            return;
        };
        if let Err(e) = self.publisher.start(self.stream.as_ref(), socket).await {
            error!("failed to start streaming: {:#}", e);
        }
    }

    /// Sends a panel event when the socket is open; otherwise it is skipped.
    fn send_event(&self, event: &PanelEvent) {
        let Some(socket) = self.socket.as_ref().filter(|s| s.ready_state().is_open()) else {
            debug!(event = event.name(), "socket not open; event not sent");
            return;
        };
        info!(event = event.name(), "sending event");
        if let Err(e) = socket.send(&SignalMessage::event(event)) {
            warn!(event = event.name(), "failed to send event: {:#}", e);
        }
    }

    /// Next event from the signaling socket. Pending forever while there is
    /// no socket.
    pub async fn next_event(&mut self) -> Option<SignalingEvent> {
        let event = match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        };
        if event.is_none() {
            self.events = None;
        }
        event
    }

    pub async fn handle_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Opened => {
                self.hint = Some(ConnectionHint::success(
                    "connected to the signaling server",
                ));
            }
            SignalingEvent::Message(message) => self.handle_message(message).await,
            SignalingEvent::Closed { code, reason } => {
                let reason = if reason.is_empty() { "no reason" } else { reason.as_str() };
                warn!(code, reason, "signaling connection closed");
                let trust_url = self.config.trust_page_url().unwrap_or_default();
                self.hint = hint_for_close(code, &trust_url);
            }
            SignalingEvent::Error(message) => error!("signaling error: {}", message),
            SignalingEvent::GaveUp { attempts } => {
                self.hint = Some(ConnectionHint::error(format!(
                    "gave up after {attempts} reconnect attempts; press connect to retry"
                )));
            }
        }
    }

    async fn handle_message(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::Answer { payload } => self.publisher.apply_answer(&payload).await,
            SignalMessage::Welcome { message } => info!("server says: {}", message),
            other => info!(kind = other.kind(), "signaling message received"),
        }
    }

    /// Tears everything down; used on exit.
    pub async fn shutdown(&mut self) {
        if self.streaming {
            self.streaming = false;
            self.publisher.stop().await;
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_media::testing::write_synthetic_ivf;
    use camlink_media::FileDeviceProvider;

    fn panel_with_cameras(names: &[&str]) -> (ControlPanel, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            write_synthetic_ivf(&dir.path().join(name), 4, 30).unwrap();
        }
        let provider = Arc::new(FileDeviceProvider::new(dir.path()));
        let panel = ControlPanel::new(ClientConfig::default(), provider).unwrap();
        (panel, dir)
    }

    #[tokio::test]
    async fn test_camera_toggle_selects_first_device() {
        let (mut panel, _dir) = panel_with_cameras(&["a.ivf", "b.ivf"]);
        panel.toggle_camera().await.unwrap();

        let status = panel.status();
        assert!(status.camera_on);
        assert_eq!(status.devices.len(), 2);
        assert_eq!(
            status.selected_device.as_deref(),
            Some(status.devices[0].device_id.as_str())
        );

        panel.toggle_camera().await.unwrap();
        let status = panel.status();
        assert!(!status.camera_on);
        assert!(status.devices.is_empty());
        assert!(status.selected_device.is_none());
    }

    #[tokio::test]
    async fn test_change_device() {
        let (mut panel, _dir) = panel_with_cameras(&["a.ivf", "b.ivf"]);
        assert!(panel.change_device("anything").await.is_err());

        panel.toggle_camera().await.unwrap();
        let second = panel.status().devices[1].device_id.clone();
        panel.change_device(&second).await.unwrap();
        assert_eq!(panel.status().selected_device, Some(second));
        assert!(panel.change_device("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_streaming_requires_camera_and_socket() {
        let (mut panel, _dir) = panel_with_cameras(&["a.ivf"]);
        assert!(panel.toggle_streaming().await.is_err());

        panel.toggle_camera().await.unwrap();
        let err = panel.toggle_streaming().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        assert!(!panel.status().streaming);
    }

    #[tokio::test]
    async fn test_connect_requires_host() {
        let (mut panel, _dir) = panel_with_cameras(&[]);
        assert!(panel.connect().await.is_err());
        assert!(panel.test_connection().await.is_err());
        assert_eq!(panel.ready_state(), ReadyState::Uninstantiated);
    }

    #[tokio::test]
    async fn test_close_codes_update_hint() {
        let (mut panel, _dir) = panel_with_cameras(&[]);
        panel.set_server("10.0.0.5", Some(6000));

        panel
            .handle_event(SignalingEvent::Closed {
                code: 1015,
                reason: String::new(),
            })
            .await;
        let hint = panel.hint().unwrap();
        assert!(hint.message.contains("https://10.0.0.5:6000"));

        panel
            .handle_event(SignalingEvent::Closed {
                code: 1000,
                reason: String::new(),
            })
            .await;
        assert!(panel.hint().is_none());
    }

    #[tokio::test]
    async fn test_answer_without_peer_is_ignored() {
        let (mut panel, _dir) = panel_with_cameras(&[]);
        panel
            .handle_event(SignalingEvent::Message(SignalMessage::answer("v=0")))
            .await;
        assert!(!panel.status().peer_active);
    }
}
