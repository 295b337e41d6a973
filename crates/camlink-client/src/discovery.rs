use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use camlink_common::MDNS_SERVICE_TYPE;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredReceiver {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    pub tls: bool,
}

/// Browses for a receiver for up to `timeout`; returns the first one that
/// resolves with an IPv4 address (or any address if only IPv6 shows up).
pub async fn discover_receiver(timeout: Duration) -> Result<DiscoveredReceiver> {
    tokio::task::spawn_blocking(move || browse(timeout)).await?
}

fn browse(timeout: Duration) -> Result<DiscoveredReceiver> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(MDNS_SERVICE_TYPE)?;
    let deadline = Instant::now() + timeout;

    let mut found = None;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let Ok(event) = receiver.recv_timeout(remaining) else {
            break;
        };
        if let ServiceEvent::ServiceResolved(info) = event {
            let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
            let Some(addr) = addresses
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addresses.first())
                .copied()
            else {
                continue;
            };
            let tls = info
                .get_property_val_str("tls")
                .map(|v| v != "0")
                .unwrap_or(true);
            debug!(name = info.get_fullname(), %addr, "receiver resolved");
            found = Some(DiscoveredReceiver {
                name: info.get_fullname().to_string(),
                addr,
                port: info.get_port(),
                tls,
            });
            break;
        }
    }

    let _ = daemon.shutdown();
    let receiver = found.ok_or_else(|| anyhow!("no camlink receivers discovered"))?;
    info!(name = %receiver.name, addr = %receiver.addr, port = receiver.port, "discovered receiver");
    Ok(receiver)
}
