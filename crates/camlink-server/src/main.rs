use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use camlink_common::DEFAULT_PORT;
use camlink_media::RecorderConfig;
use camlink_server::config::{
    DEFAULT_FRAME_QUEUE_CAPACITY, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_STUN_SERVER,
};
use camlink_server::discovery::advertise_mdns;
use camlink_server::{
    frame_queue, load_server_tls, run_display_loop, ReceiverContext, ServerConfig,
    SignalingServer, TlsFiles,
};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "camlink-server", about = "Receive a Camlink camera stream over WebRTC")]
struct Args {
    /// Listen address
    #[arg(long, env = "CAMLINK_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port (signaling and trust page)
    #[arg(long, env = "CAMLINK_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// PEM certificate chain
    #[arg(long, env = "CAMLINK_CERT", default_value = "cert.pem")]
    cert: PathBuf,

    /// PEM private key
    #[arg(long, env = "CAMLINK_KEY", default_value = "key.pem")]
    key: PathBuf,

    /// Serve plain ws:// (trusted networks only)
    #[arg(long, env = "CAMLINK_NO_TLS", default_value_t = false)]
    no_tls: bool,

    /// STUN/TURN server URL (repeatable)
    #[arg(long = "ice-server", env = "CAMLINK_ICE_SERVERS", value_delimiter = ',', default_value = DEFAULT_STUN_SERVER)]
    ice_servers: Vec<String>,

    /// Gather host candidates only
    #[arg(long, default_value_t = false)]
    no_stun: bool,

    /// Record received RTP into this directory
    #[arg(long, env = "CAMLINK_RECORD_DIR")]
    record_dir: Option<PathBuf>,

    /// Frames buffered before new ones are dropped
    #[arg(long, env = "CAMLINK_FRAME_QUEUE", default_value_t = DEFAULT_FRAME_QUEUE_CAPACITY)]
    frame_queue: usize,

    /// Seconds between throughput logs
    #[arg(long, env = "CAMLINK_STATS_INTERVAL", default_value_t = 5)]
    stats_interval_secs: u64,

    /// Seconds between keyframe requests
    #[arg(long, default_value_t = 3)]
    pli_interval_secs: u64,

    /// Largest accepted signaling message
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,

    /// Disable mDNS advertisement
    #[arg(long, env = "CAMLINK_DISABLE_MDNS", default_value_t = false)]
    disable_mdns: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let ip = self
            .host
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| anyhow!("invalid listen host: {}", self.host))?;
        let config = ServerConfig {
            listen: SocketAddr::new(ip, self.port),
            tls: (!self.no_tls).then(|| TlsFiles {
                cert: self.cert,
                key: self.key,
            }),
            ice_servers: if self.no_stun {
                Vec::new()
            } else {
                self.ice_servers
            },
            frame_queue_capacity: self.frame_queue,
            recorder: self.record_dir.map(|output_dir| RecorderConfig {
                output_dir,
                ..Default::default()
            }),
            stats_interval: Duration::from_secs(self.stats_interval_secs),
            pli_interval: Duration::from_secs(self.pli_interval_secs),
            max_message_bytes: self.max_message_bytes,
            mdns: !self.disable_mdns,
        };
        config.validate()?;
        Ok(config)
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    let tls = match &config.tls {
        Some(files) => Some(load_server_tls(files)?),
        None => None,
    };

    let (frames_tx, frames_rx) = frame_queue(config.frame_queue_capacity);
    let context = Arc::new(ReceiverContext::new(
        config.ice_servers.clone(),
        frames_tx,
        config.recorder.clone(),
        config.pli_interval,
    )?);

    let server = SignalingServer::bind(&config, tls, context).await?;
    server.log_banner();

    let _mdns = if config.mdns {
        match advertise_mdns(server.local_addr(), server.is_tls()) {
            Ok(daemon) => Some(daemon),
            Err(e) => {
                warn!("mDNS advertisement failed: {}", e);
                None
            }
        }
    } else {
        info!("mDNS advertisement disabled");
        None
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));

    let summary = run_display_loop(frames_rx, config.stats_interval, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await;

    let _ = stop_tx.send(());
    server_task.await??;
    info!(
        frames = summary.frames,
        keyframes = summary.keyframes,
        dropped = summary.dropped,
        "receiver stopped"
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    camlink_common::init_tracing();
    let config = args.into_config()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args_build_tls_config() {
        let config = Args::parse_from(["camlink-server"]).into_config().unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert!(config.tls.is_some());
        assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(config.recorder.is_none());
        assert!(config.mdns);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Args::parse_from([
            "camlink-server",
            "--host",
            "127.0.0.1",
            "--port",
            "6000",
            "--no-tls",
            "--no-stun",
            "--record-dir",
            "/tmp/rec",
            "--disable-mdns",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:6000".parse().unwrap());
        assert!(config.tls.is_none());
        assert!(config.ice_servers.is_empty());
        assert_eq!(
            config.recorder.unwrap().output_dir,
            PathBuf::from("/tmp/rec")
        );
        assert!(!config.mdns);
    }

    #[test]
    fn test_bad_host_is_rejected() {
        assert!(Args::parse_from(["camlink-server", "--host", "not an ip"])
            .into_config()
            .is_err());
    }
}
