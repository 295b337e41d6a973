use std::net::SocketAddr;

use anyhow::Result;
use camlink_common::helpers::local_ip;
use camlink_common::MDNS_SERVICE_TYPE;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::info;

pub const MDNS_INSTANCE_NAME: &str = "camlink-receiver";

/// Advertises the signaling endpoint on the LAN. Keep the returned daemon
/// alive for as long as the advertisement should stay up.
pub fn advertise_mdns(listen_addr: SocketAddr, tls: bool) -> Result<ServiceDaemon> {
    let ip = if listen_addr.ip().is_unspecified() {
        local_ip()
    } else {
        listen_addr.ip()
    };
    let tls_flag = if tls { "1" } else { "0" };

    let mdns = ServiceDaemon::new()?;
    let service_info = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        MDNS_INSTANCE_NAME,
        "camlink.local.",
        ip.to_string(),
        listen_addr.port(),
        &[("v", "1"), ("tls", tls_flag)][..],
    )?
    .enable_addr_auto();
    mdns.register(service_info)?;
    info!(service = MDNS_SERVICE_TYPE, port = listen_addr.port(), "advertising via mDNS");
    Ok(mdns)
}
