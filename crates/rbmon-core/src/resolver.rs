//! Public address lookup.
//!
//! Each address family walks a list of echo services and takes the first body
//! that parses as an address of that family. When every service fails, the
//! local address of the default route is used.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

/// Timeout for each echo service.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(3);

pub const IPV4_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://icanhazip.com",
    "https://ipinfo.io/ip",
    "https://checkip.amazonaws.com",
];

pub const IPV6_SERVICES: &[&str] = &[
    "https://ipv6.icanhazip.com",
    "https://v6.ident.me",
    "https://6.ipw.cn",
];

/// Addresses reported with every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// `"ipv4:A | ipv6:B"`.
    pub display: String,
    pub ipv4: String,
    pub ipv6: Option<String>,
}

impl AddressInfo {
    pub fn new(ipv4: String, ipv6: Option<String>) -> Self {
        let display = display_string(&ipv4, ipv6.as_deref());
        Self {
            display,
            ipv4,
            ipv6,
        }
    }

    /// Placeholder used before the first lookup completes.
    pub fn loopback() -> Self {
        Self::new(Ipv4Addr::LOCALHOST.to_string(), None)
    }
}

/// Builds the display string. Loopback IPv4 is dropped when IPv6 is known.
pub fn display_string(ipv4: &str, ipv6: Option<&str>) -> String {
    let mut parts = Vec::new();
    if ipv4 != "127.0.0.1" {
        parts.push(format!("ipv4:{}", ipv4));
    }
    if let Some(v6) = ipv6 {
        parts.push(format!("ipv6:{}", v6));
    }
    if parts.is_empty() {
        parts.push(format!("ipv4:{}", ipv4));
    }
    parts.join(" | ")
}

/// Returns the first service response that parses as `T`.
pub fn first_valid<T, G>(services: &[&str], mut fetch: G) -> Option<T>
where
    T: FromStr,
    G: FnMut(&str) -> Option<String>,
{
    for service in services {
        let Some(body) = fetch(service) else {
            continue;
        };
        match body.trim().parse::<T>() {
            Ok(addr) => return Some(addr),
            Err(_) => debug!("{} returned a non-address body", service),
        }
    }
    None
}

/// Global unicast check (`Ipv6Addr::is_global` is not stable).
pub fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    !(addr.is_loopback()
        || addr.is_unspecified()
        || addr.is_multicast()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xfe00) == 0xfc00
        || (first == 0x2001 && addr.segments()[1] == 0x0db8))
}

/// Local address the kernel would use for outbound traffic.
///
/// Connecting a UDP socket sends no packets; it only selects a route.
fn local_outbound(bind: &str, target: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

/// Source of the agent's public addresses.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self) -> AddressInfo;
}

/// Resolver using HTTPS echo services with `reqwest`.
pub struct HttpAddressResolver {
    client: Option<reqwest::blocking::Client>,
}

impl HttpAddressResolver {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(SERVICE_TIMEOUT)
            .build();
        match client {
            Ok(client) => Self {
                client: Some(client),
            },
            Err(e) => {
                warn!("HTTP client unavailable, using local addresses only: {}", e);
                Self { client: None }
            }
        }
    }

    fn fetch(&self, url: &str) -> Option<String> {
        let client = self.client.as_ref()?;
        match client.get(url).send() {
            Ok(resp) if resp.status().is_success() => resp.text().ok(),
            Ok(resp) => {
                debug!("{} answered {}", url, resp.status());
                None
            }
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                None
            }
        }
    }

    fn ipv4(&self) -> String {
        if let Some(addr) = first_valid::<Ipv4Addr, _>(IPV4_SERVICES, |url| self.fetch(url)) {
            return addr.to_string();
        }
        match local_outbound("0.0.0.0:0", "8.8.8.8:80") {
            Some(IpAddr::V4(addr)) if !addr.is_unspecified() => {
                debug!("Public IPv4 lookup failed, using local address {}", addr);
                addr.to_string()
            }
            _ => {
                warn!("No IPv4 address found, reporting 127.0.0.1");
                Ipv4Addr::LOCALHOST.to_string()
            }
        }
    }

    fn ipv6(&self) -> Option<String> {
        if let Some(addr) = first_valid::<Ipv6Addr, _>(IPV6_SERVICES, |url| self.fetch(url)) {
            return Some(addr.to_string());
        }
        match local_outbound("[::]:0", "[2001:4860:4860::8888]:80") {
            Some(IpAddr::V6(addr)) if is_global_unicast(&addr) => Some(addr.to_string()),
            _ => {
                debug!("IPv6 not available");
                None
            }
        }
    }
}

impl Default for HttpAddressResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressResolver for HttpAddressResolver {
    fn resolve(&self) -> AddressInfo {
        let info = AddressInfo::new(self.ipv4(), self.ipv6());
        debug!("Resolved addresses: {}", info.display);
        info
    }
}
