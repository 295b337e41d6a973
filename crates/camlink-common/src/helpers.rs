//! Common helper functions for Camlink.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use chrono::{SecondsFormat, Utc};

/// Best-effort LAN address of this machine.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface. Falls back to loopback.
pub fn local_ip() -> IpAddr {
    let detect = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("10.255.255.255", 1))?;
        Ok(socket.local_addr()?.ip())
    };
    detect().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Host part of a URL; IPv6 literals get brackets.
pub fn url_host(host: &str) -> String {
    let host = host.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// `wss://host:port` signaling endpoint.
pub fn signaling_url(host: &str, port: u16) -> String {
    format!("wss://{}:{}", url_host(host), port)
}

/// `https://host:port` page the user opens to trust a self-signed certificate.
pub fn trust_page_url(host: &str, port: u16) -> String {
    format!("https://{}:{}", url_host(host), port)
}

/// Current UTC time as ISO-8601 with millisecond precision (`...Z`).
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
