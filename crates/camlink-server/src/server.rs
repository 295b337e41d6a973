use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::ConnectInfo, Router};
use camlink_common::helpers::local_ip;
use camlink_common::tls::display_fingerprint;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::receiver::ReceiverContext;
use crate::signaling::{router, AppState, ReceiverRegistry};
use crate::tls::ServerTls;

pub struct SignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    tls: Option<ServerTls>,
    registry: ReceiverRegistry,
    app: Router,
}

impl SignalingServer {
    /// Binds the listener. `tls` must be loaded beforehand when the
    /// configuration asks for it; `None` serves plain `ws://`.
    pub async fn bind(
        config: &ServerConfig,
        tls: Option<ServerTls>,
        context: Arc<ReceiverContext>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("bind {}", config.listen))?;
        let local_addr = listener.local_addr()?;

        let registry = ReceiverRegistry::default();
        let app = router(AppState {
            context,
            registry: registry.clone(),
            max_message_bytes: config.max_message_bytes,
        });

        Ok(Self {
            listener,
            local_addr,
            tls,
            registry,
            app,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> ReceiverRegistry {
        self.registry.clone()
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Logs where to point the control panel.
    pub fn log_banner(&self) {
        let (ws, http) = if self.is_tls() {
            ("wss", "https")
        } else {
            ("ws", "http")
        };
        let port = self.local_addr.port();
        let host = if self.local_addr.ip().is_unspecified() {
            local_ip()
        } else {
            self.local_addr.ip()
        };
        let host = camlink_common::helpers::url_host(&host.to_string());

        info!("camlink receiver listening on {}", self.local_addr);
        info!("signaling URL: {ws}://{host}:{port}");
        info!("trust page:    {http}://{host}:{port} (open once on the publishing device to accept the certificate)");
        info!("make sure TCP port {port} is allowed through the firewall");
        match &self.tls {
            Some(tls) => info!(
                "certificate sha256: {} (pin with CAMLINK_TLS_PINS_SHA256)",
                display_fingerprint(&tls.fingerprint)
            ),
            None => warn!("TLS disabled: signaling is unencrypted and browsers will refuse camera access"),
        }
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// active receiver.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    let app = self.app.clone();
                    let acceptor = self.tls.as_ref().map(|tls| tls.acceptor.clone());
                    tokio::spawn(async move {
                        accept_connection(stream, peer, acceptor, app).await;
                    });
                }
            }
        }
        info!("signaling server stopping");
        self.registry.close_all().await;
        Ok(())
    }
}

async fn accept_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    app: Router,
) {
    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => serve_connection(tls_stream, peer, app).await,
            // Usually a browser that has not accepted the certificate yet.
            Err(e) => info!(%peer, "TLS handshake failed: {}", e),
        },
        None => serve_connection(stream, peer, app).await,
    }
}

async fn serve_connection<I>(io: I, peer: SocketAddr, app: Router)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        app.clone().oneshot(request)
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
    {
        debug!(%peer, "connection closed with error: {}", e);
    }
}
