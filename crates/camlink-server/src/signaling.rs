use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{Html, IntoResponse},
    Router,
};
use camlink_common::{EventPayload, SdpPayload, SignalMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::receiver::{Receiver, ReceiverContext};

const WS_OUTBOX_CAPACITY: usize = 32;

pub const WELCOME_MESSAGE: &str = "Connected to camlink receiver";

/// Active receivers, one per signaling connection.
#[derive(Clone, Default)]
pub struct ReceiverRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Receiver>>>>,
}

impl ReceiverRegistry {
    pub async fn insert(&self, receiver: Arc<Receiver>) {
        self.inner
            .write()
            .await
            .insert(receiver.connection_id(), receiver);
    }

    pub async fn remove(&self, connection_id: &Uuid) -> Option<Arc<Receiver>> {
        self.inner.write().await.remove(connection_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn close_all(&self) {
        let receivers: Vec<Arc<Receiver>> =
            self.inner.write().await.drain().map(|(_, r)| r).collect();
        if !receivers.is_empty() {
            info!("closing {} active receiver(s)", receivers.len());
        }
        for receiver in receivers {
            receiver.close().await;
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ReceiverContext>,
    pub registry: ReceiverRegistry,
    pub max_message_bytes: usize,
}

/// Every path answers both a WebSocket upgrade and a plain GET, so the
/// signaling URL doubles as the page that gets a self-signed certificate
/// trusted.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(entry).with_state(state)
}

async fn entry(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> axum::response::Response {
    match ws {
        Some(ws) => {
            let limit = state.max_message_bytes;
            ws.max_message_size(limit)
                .max_frame_size(limit)
                .on_upgrade(move |socket| handle_socket(socket, state, addr))
                .into_response()
        }
        None => {
            debug!(%addr, "served trust page");
            Html(TRUST_PAGE).into_response()
        }
    }
}

const TRUST_PAGE: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>camlink receiver</title></head>\n<body><h1>camlink receiver</h1>\n<p>The certificate is trusted. Close this tab and press Connect in the control panel.</p>\n</body></html>\n";

async fn handle_socket(stream: WebSocket, state: AppState, addr: SocketAddr) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, %addr, "client connected");

    let (mut sender, mut inbound) = stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_OUTBOX_CAPACITY);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    if send_signal(&tx, &SignalMessage::welcome(WELCOME_MESSAGE))
        .await
        .is_err()
    {
        writer.abort();
        return;
    }

    let mut receiver = match open_receiver(&state, connection_id).await {
        Some(receiver) => receiver,
        None => {
            writer.abort();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => break,
            msg = inbound.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(%connection_id, "websocket error: {}", e);
                        break;
                    }
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(bytes) => {
                        warn!(%connection_id, len = bytes.len(), "ignoring binary message");
                        continue;
                    }
                    Message::Close(frame) => {
                        debug!(%connection_id, ?frame, "client sent close");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };

                match handle_text(&text, &receiver, connection_id).await {
                    Action::None => {}
                    Action::Reply(reply) => {
                        if send_signal(&tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Action::ResetReceiver => {
                        receiver.close().await;
                        match open_receiver(&state, connection_id).await {
                            Some(fresh) => receiver = fresh,
                            None => break,
                        }
                    }
                }
            }
        }
    }

    state.registry.remove(&connection_id).await;
    receiver.close().await;
    writer.abort();
    info!(%connection_id, %addr, "client disconnected");
}

async fn open_receiver(state: &AppState, connection_id: Uuid) -> Option<Arc<Receiver>> {
    match Receiver::new(&state.context, connection_id).await {
        Ok(receiver) => {
            let receiver = Arc::new(receiver);
            state.registry.insert(Arc::clone(&receiver)).await;
            Some(receiver)
        }
        Err(e) => {
            error!(%connection_id, "failed to create receiver: {:#}", e);
            None
        }
    }
}

#[derive(Debug)]
enum Action {
    None,
    Reply(SignalMessage),
    ResetReceiver,
}

async fn handle_text(text: &str, receiver: &Receiver, connection_id: Uuid) -> Action {
    let signal = match SignalMessage::from_json(text) {
        Ok(signal) => signal,
        Err(e) => {
            error!(%connection_id, "invalid signaling message: {}", e);
            return Action::None;
        }
    };

    match signal {
        SignalMessage::Offer { payload } => handle_offer(payload, receiver, connection_id).await,
        SignalMessage::Event { payload } => handle_event(&payload, connection_id),
        other => {
            warn!(%connection_id, kind = other.kind(), "unhandled message type");
            Action::None
        }
    }
}

async fn handle_offer(payload: SdpPayload, receiver: &Receiver, connection_id: Uuid) -> Action {
    if !payload.is_complete() {
        warn!(%connection_id, "offer is missing sdp or type; ignoring");
        return Action::None;
    }
    info!(%connection_id, "received offer");
    match receiver.handle_offer(&payload).await {
        Some(answer) => {
            info!(%connection_id, "sending answer");
            Action::Reply(SignalMessage::Answer { payload: answer })
        }
        None => Action::None,
    }
}

fn handle_event(payload: &EventPayload, connection_id: Uuid) -> Action {
    info!(
        %connection_id,
        event = %payload.event_name,
        data = %payload.data,
        timestamp = payload.timestamp.as_deref().unwrap_or("-"),
        "panel event"
    );
    match payload.panel_event() {
        Some(event) if event.resets_receiver() => {
            info!(%connection_id, event = event.name(), "resetting receiver for a new offer");
            Action::ResetReceiver
        }
        Some(_) => Action::None,
        None => {
            debug!(%connection_id, event = %payload.event_name, "unrecognized event name");
            Action::None
        }
    }
}

async fn send_signal(tx: &mpsc::Sender<Message>, signal: &SignalMessage) -> anyhow::Result<()> {
    let text = signal.to_json()?;
    tx.send(Message::Text(text)).await?;
    Ok(())
}
