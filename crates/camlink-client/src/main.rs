use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camlink_client::{
    discover_receiver, ClientConfig, ControlPanel, PanelStatus, ReconnectPolicy, SignalingEvent,
    TrustPolicy,
};
use camlink_common::DEFAULT_PORT;
use camlink_media::FileDeviceProvider;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "camlink-client", about = "Publish a capture device to a Camlink receiver")]
struct Args {
    /// Receiver host or IP
    #[arg(long, env = "CAMLINK_SERVER_HOST")]
    host: Option<String>,

    /// Receiver port
    #[arg(long, env = "CAMLINK_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect to a receiver started with --no-tls
    #[arg(long, env = "CAMLINK_NO_TLS", default_value_t = false)]
    no_tls: bool,

    /// Directory of .ivf/.h264 captures exposed as cameras
    #[arg(long, env = "CAMLINK_DEVICES_DIR", default_value = "cameras")]
    devices_dir: PathBuf,

    /// Playback rate for captures without timing
    #[arg(long, env = "CAMLINK_FPS", default_value_t = 30)]
    fps: u32,

    /// Comma-separated SHA-256 certificate pins
    #[arg(long)]
    pins: Option<String>,

    /// Accept any server certificate
    #[arg(long, env = "CAMLINK_INSECURE", default_value_t = false)]
    insecure: bool,

    /// Seconds between reconnect attempts
    #[arg(long, env = "CAMLINK_RECONNECT_INTERVAL", default_value_t = 3)]
    reconnect_interval_secs: u64,

    /// Reconnect attempts before giving up
    #[arg(long, env = "CAMLINK_RECONNECT_ATTEMPTS", default_value_t = 20)]
    reconnect_attempts: u32,

    /// STUN/TURN server URL (repeatable)
    #[arg(long = "ice-server", env = "CAMLINK_ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Connect as soon as the panel starts
    #[arg(long, default_value_t = false)]
    connect: bool,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        let trust = TrustPolicy::resolve(self.insecure, self.pins.as_deref())?;
        Ok(ClientConfig {
            host: self.host.filter(|h| !h.trim().is_empty()),
            port: self.port,
            tls: !self.no_tls,
            devices_dir: self.devices_dir,
            fps: self.fps.max(1),
            trust,
            reconnect: ReconnectPolicy {
                interval: Duration::from_secs(self.reconnect_interval_secs.max(1)),
                max_attempts: self.reconnect_attempts,
            },
            ice_servers: self.ice_servers,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Connect {
        host: Option<String>,
        port: Option<u16>,
    },
    Disconnect,
    Test,
    Camera,
    Devices,
    Device(String),
    Stream,
    Status,
    Discover,
    Help,
    Quit,
}

const HELP: &str = "commands: connect [host] [port] | disconnect | test | camera | devices | \
device <id> | stream | status | discover | help | quit";

fn parse_command(line: &str) -> Result<Command, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("empty command".into());
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .ok_or_else(|| "missing command".to_string())?
        .to_ascii_lowercase();
    let command = match verb.as_str() {
        "connect" => {
            let host = parts.next().map(str::to_string);
            let port = parts
                .next()
                .map(|p| p.parse::<u16>())
                .transpose()
                .map_err(|_| "port must be a number between 0 and 65535".to_string())?;
            Command::Connect { host, port }
        }
        "disconnect" => Command::Disconnect,
        "test" => Command::Test,
        "camera" => Command::Camera,
        "devices" => Command::Devices,
        "device" => Command::Device(
            parts
                .next()
                .ok_or_else(|| "missing device id".to_string())?
                .to_string(),
        ),
        "stream" => Command::Stream,
        "status" => Command::Status,
        "discover" => Command::Discover,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}`")),
    };

    if parts.next().is_some() {
        return Err("too many arguments".into());
    }
    Ok(command)
}

fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match parse_command(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(err) => eprintln!("invalid command `{}`: {} ({HELP})", line.trim(), err),
                },
                Err(err) => {
                    eprintln!("stdin read error: {}", err);
                    break;
                }
            }
        }
        let _ = tx.send(Command::Quit);
    });
}

fn print_status(status: &PanelStatus) {
    println!(
        "server: {}",
        status.server.as_deref().unwrap_or("(not set)")
    );
    println!("socket: {}", status.ready_state);
    if let Some(hint) = &status.hint {
        println!("hint:   {hint}");
    }
    if let Some(test) = &status.test {
        println!("test:   {test}");
    }
    println!(
        "camera: {}{}",
        if status.camera_on { "on" } else { "off" },
        status
            .selected_device
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default()
    );
    println!(
        "stream: {}{}",
        if status.streaming { "streaming" } else { "idle" },
        if status.peer_active { ", peer connection up" } else { "" }
    );
}

fn print_devices(status: &PanelStatus) {
    if status.devices.is_empty() {
        println!("no devices (turn the camera on first)");
        return;
    }
    for device in &status.devices {
        let marker = if status.selected_device.as_deref() == Some(device.device_id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}  {}", device.device_id, device.display_label());
    }
}

enum Step {
    Command(Command),
    Event(SignalingEvent),
    Quit,
}

/// Returns `false` once the panel should exit.
async fn run_command(panel: &mut ControlPanel, command: Command) -> bool {
    let result = match command {
        Command::Connect { host, port } => {
            if let Some(host) = host {
                panel.set_server(host, port);
            }
            panel.connect().await
        }
        Command::Disconnect => {
            panel.disconnect().await;
            Ok(())
        }
        Command::Test => panel.test_connection().await.map(|result| {
            println!("{result}");
        }),
        Command::Camera => panel.toggle_camera().await,
        Command::Devices => {
            print_devices(&panel.status());
            Ok(())
        }
        Command::Device(id) => panel.change_device(&id).await,
        Command::Stream => panel.toggle_streaming().await,
        Command::Status => {
            print_status(&panel.status());
            Ok(())
        }
        Command::Discover => match discover_receiver(DISCOVERY_TIMEOUT).await {
            Ok(found) => {
                panel.set_server(found.addr.to_string(), Some(found.port));
                panel.set_tls(found.tls);
                println!("found {} at {}:{}", found.name, found.addr, found.port);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return false,
    };
    if let Err(e) = result {
        error!("{:#}", e);
    }
    true
}

async fn run(args: Args) -> Result<()> {
    let auto_connect = args.connect;
    let config = args.into_config()?;
    let provider = Arc::new(
        FileDeviceProvider::new(config.devices_dir.clone()).with_fps(config.fps),
    );
    let mut panel = ControlPanel::new(config, provider)?;

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    spawn_stdin_reader(commands_tx);
    println!("{HELP}");

    if auto_connect {
        if let Err(e) = panel.connect().await {
            warn!("auto-connect skipped: {:#}", e);
        }
    }

    loop {
        let step = tokio::select! {
            command = commands.recv() => command.map_or(Step::Quit, Step::Command),
            Some(event) = panel.next_event() => Step::Event(event),
            _ = tokio::signal::ctrl_c() => Step::Quit,
        };
        match step {
            Step::Command(command) => {
                if !run_command(&mut panel, command).await {
                    break;
                }
            }
            Step::Event(event) => panel.handle_event(event).await,
            Step::Quit => break,
        }
    }

    info!("shutting down");
    panel.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    camlink_common::init_tracing();
    run(Args::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_variants() {
        assert_eq!(
            parse_command("connect").unwrap(),
            Command::Connect {
                host: None,
                port: None
            }
        );
        assert_eq!(
            parse_command("  CONNECT 192.168.1.20 6000 ").unwrap(),
            Command::Connect {
                host: Some("192.168.1.20".into()),
                port: Some(6000)
            }
        );
        assert!(parse_command("connect host notaport").is_err());
        assert!(parse_command("connect host 1 extra").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("stream").unwrap(), Command::Stream);
        assert_eq!(parse_command("camera").unwrap(), Command::Camera);
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
        assert_eq!(
            parse_command("device abc123").unwrap(),
            Command::Device("abc123".into())
        );
        assert!(parse_command("device").is_err());
        assert!(parse_command("").is_err());
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::try_parse_from([
            "camlink-client",
            "--host",
            "10.0.0.2",
            "--insecure",
            "--no-tls",
            "--reconnect-attempts",
            "5",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.trust, TrustPolicy::AcceptAny);
        assert!(!config.tls);
        assert_eq!(config.reconnect.max_attempts, 5);
    }
}
