//! Reconnecting WebSocket to the receiver.

use std::time::Duration;

use anyhow::{anyhow, Result};
use camlink_common::SignalMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::tls::TrustPolicy;
use crate::types::{ConnectionHint, ReadyState, ReconnectPolicy};

/// Close code reported for a connection that dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code reported when the TLS handshake failed.
pub const CLOSE_TLS_HANDSHAKE: u16 = 1015;
pub const CLOSE_NORMAL: u16 = 1000;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Opened,
    Message(SignalMessage),
    Closed { code: u16, reason: String },
    Error(String),
    /// Reconnect budget exhausted; the socket stays closed.
    GaveUp { attempts: u32 },
}

/// Hint to show after a close. `None` clears the current hint.
pub fn hint_for_close(code: u16, trust_url: &str) -> Option<ConnectionHint> {
    match code {
        CLOSE_NORMAL => None,
        CLOSE_ABNORMAL | CLOSE_TLS_HANDSHAKE => Some(ConnectionHint::error(format!(
            "connection failed (code {code}); this is almost always an untrusted certificate: open {trust_url} once, accept the certificate, then connect again"
        ))),
        _ => Some(ConnectionHint::warning(format!(
            "connection closed unexpectedly (code {code})"
        ))),
    }
}

enum Command {
    Send(String),
    Close,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct SignalingClient {
    url: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ReadyState>,
    task: JoinHandle<()>,
}

impl SignalingClient {
    /// Starts connecting in the background. Events arrive on the returned
    /// receiver until the client is closed or gives up.
    pub fn spawn(
        url: impl Into<String>,
        trust: &TrustPolicy,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let url = url.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReadyState::Uninstantiated);

        let task = tokio::spawn(run_socket(
            url.clone(),
            trust.connector(),
            policy,
            commands_rx,
            events_tx,
            state_tx,
        ));

        (
            Self {
                url,
                commands: commands_tx,
                state: state_rx,
                task,
            },
            events_rx,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Queues a message. Fails unless the socket is open.
    pub fn send(&self, message: &SignalMessage) -> Result<()> {
        let state = self.ready_state();
        if !state.is_open() {
            return Err(anyhow!("signaling socket is not open ({state})"));
        }
        let text = message.to_json()?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| anyhow!("signaling task has stopped"))
    }

    /// Sends a normal close and stops reconnecting.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        let mut task = self.task;
        if tokio::time::timeout(CLOSE_GRACE * 2, &mut task).await.is_err() {
            debug!(url = %self.url, "signaling task did not stop in time; aborting");
            task.abort();
        }
    }
}

enum SessionEnd {
    ClosedByUser,
    Dropped { code: u16, reason: String },
}

async fn run_socket(
    url: String,
    connector: Option<Connector>,
    policy: ReconnectPolicy,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SignalingEvent>,
    state: watch::Sender<ReadyState>,
) {
    let mut attempts: u32 = 0;
    loop {
        state.send_replace(ReadyState::Connecting);
        info!(%url, attempt = attempts, "connecting to signaling server");

        let connect = connect_async_tls_with_config(url.as_str(), None, false, connector.clone());
        let connected = tokio::select! {
            result = connect => result,
            _ = recv_until_close(&mut commands) => {
                state.send_replace(ReadyState::Closed);
                return;
            }
        };

        let end = match connected {
            Ok((socket, _response)) => {
                attempts = 0;
                state.send_replace(ReadyState::Open);
                info!(%url, "signaling connection open");
                let _ = events.send(SignalingEvent::Opened);
                pump(socket, &mut commands, &events, &state).await
            }
            Err(e) => {
                let code = if is_tls_failure(&e) {
                    CLOSE_TLS_HANDSHAKE
                } else {
                    CLOSE_ABNORMAL
                };
                warn!(%url, code, "signaling connection failed: {}", e);
                let _ = events.send(SignalingEvent::Error(e.to_string()));
                SessionEnd::Dropped {
                    code,
                    reason: e.to_string(),
                }
            }
        };

        state.send_replace(ReadyState::Closed);
        match end {
            SessionEnd::ClosedByUser => {
                let _ = events.send(SignalingEvent::Closed {
                    code: CLOSE_NORMAL,
                    reason: String::new(),
                });
                return;
            }
            SessionEnd::Dropped { code, reason } => {
                let _ = events.send(SignalingEvent::Closed { code, reason });
            }
        }

        if attempts >= policy.max_attempts {
            warn!(%url, attempts, "giving up on signaling server");
            let _ = events.send(SignalingEvent::GaveUp { attempts });
            return;
        }
        attempts += 1;

        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = recv_until_close(&mut commands) => return,
        }
    }
}

/// Resolves once a close is requested or the client handle is dropped.
/// Messages queued while the socket is not open are discarded.
async fn recv_until_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Close => return,
            Command::Send(_) => debug!("dropping message queued while disconnected"),
        }
    }
}

async fn pump(
    socket: Socket,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
    state: &watch::Sender<ReadyState>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        return SessionEnd::Dropped { code: CLOSE_ABNORMAL, reason: e.to_string() };
                    }
                }
                Some(Command::Close) | None => {
                    state.send_replace(ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_ok() {
                        // Wait for the server's close reply.
                        let _ = tokio::time::timeout(CLOSE_GRACE, async {
                            while let Some(Ok(msg)) = stream.next().await {
                                if matches!(msg, Message::Close(_)) {
                                    break;
                                }
                            }
                        })
                        .await;
                    }
                    return SessionEnd::ClosedByUser;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match SignalMessage::from_json(&text) {
                    Ok(signal) => {
                        let _ = events.send(SignalingEvent::Message(signal));
                    }
                    Err(e) => warn!("unparseable signaling message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    return SessionEnd::Dropped { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return SessionEnd::Dropped { code: CLOSE_ABNORMAL, reason: e.to_string() };
                }
                None => {
                    return SessionEnd::Dropped {
                        code: CLOSE_ABNORMAL,
                        reason: "connection closed without a close frame".into(),
                    };
                }
            }
        }
    }
}

fn is_tls_failure(err: &WsError) -> bool {
    match err {
        WsError::Tls(_) => true,
        WsError::Io(io) => io
            .get_ref()
            .is_some_and(|inner| inner.is::<rustls::Error>()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HintLevel;

    const TRUST: &str = "https://192.168.1.20:5001";

    #[test]
    fn test_certificate_codes_point_at_trust_page() {
        for code in [1006, 1015] {
            let hint = hint_for_close(code, TRUST).unwrap();
            assert_eq!(hint.level, HintLevel::Error);
            assert!(hint.message.contains(TRUST));
            assert!(hint.message.contains(&code.to_string()));
        }
    }

    #[test]
    fn test_normal_close_clears_hint() {
        assert!(hint_for_close(1000, TRUST).is_none());
    }

    #[test]
    fn test_other_codes_warn() {
        let hint = hint_for_close(1011, TRUST).unwrap();
        assert_eq!(hint.level, HintLevel::Warning);
        assert_eq!(hint.message, "connection closed unexpectedly (code 1011)");
    }

    #[test]
    fn test_rustls_errors_count_as_tls_failures() {
        let io = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::General("pin mismatch".into()),
        );
        assert!(is_tls_failure(&WsError::Io(io)));
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(!is_tls_failure(&WsError::Io(refused)));
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        // Nothing listens on this port once the listener is dropped.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let policy = ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 2,
        };
        let (client, mut events) = SignalingClient::spawn(
            format!("ws://127.0.0.1:{port}"),
            &TrustPolicy::SystemRoots,
            policy,
        );

        let mut closes = 0;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                SignalingEvent::Closed { code, .. } => {
                    assert_eq!(code, CLOSE_ABNORMAL);
                    closes += 1;
                }
                SignalingEvent::GaveUp { attempts } => {
                    assert_eq!(attempts, 2);
                    break;
                }
                SignalingEvent::Error(_) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        // First try plus two reconnects.
        assert_eq!(closes, 3);
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert!(client.send(&SignalMessage::welcome("x")).is_err());
        client.close().await;
    }
}
