//! Collaborator interfaces.
//!
//! The engine never touches hardware or sockets directly. Everything outside
//! the command protocol (WiFi association, TCP/TLS transport, the wall clock,
//! the settings block and the device itself) is reached through the traits
//! in this module, bundled into a [`Platform`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use atmod_cert::TrustCredentials;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, StorageError};

// ============================================================================
// Network
// ============================================================================

/// Transport type of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Tcp,
    Udp,
    Ssl,
}

impl LinkKind {
    /// Name used in command arguments and status replies.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Tcp => "TCP",
            LinkKind::Udp => "UDP",
            LinkKind::Ssl => "SSL",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS parameters for an SSL link.
#[derive(Debug, Clone, Copy)]
pub struct TlsParams<'a> {
    /// How the server certificate is checked.
    pub credentials: TrustCredentials<'a>,
    /// Receive buffer size.
    pub buffer_size: usize,
}

/// Everything needed to open an outgoing link.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub kind: LinkKind,
    /// Host name or dotted address, passed through for TLS name checks.
    pub host: &'a str,
    pub port: u16,
    /// Present for [`LinkKind::Ssl`].
    pub tls: Option<TlsParams<'a>>,
}

/// An established stream connection.
pub trait Connection {
    /// Whether the peer is still connected.
    fn connected(&self) -> bool;

    /// Bytes ready to be read.
    fn available(&self) -> usize;

    /// Read up to `buf.len()` bytes without blocking.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write `data`, returning how much was accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, NetError>;

    /// Wait until a write would make progress.
    fn wait_writable(&mut self, timeout: Duration) -> bool;

    /// Close the connection.
    fn close(&mut self);

    /// Address of the peer.
    fn remote_addr(&self) -> SocketAddrV4;

    /// Local port number.
    fn local_port(&self) -> u16;

    /// Whether max fragment length negotiation succeeded (TLS only).
    fn mfln_status(&self) -> bool {
        false
    }
}

/// A listening TCP socket.
pub trait Listener {
    /// Take one pending connection.
    fn accept(&mut self) -> Option<Box<dyn Connection>>;

    /// Port the socket listens on.
    fn port(&self) -> u16;

    /// Stop listening.
    fn close(&mut self);
}

/// TCP/TLS transport and name resolution.
pub trait NetworkStack {
    /// Resolve the host and open a connection.
    ///
    /// Resolution failures are reported as [`NetError::Dns`].
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>, NetError>;

    /// Open a listening socket.
    fn listen(&mut self, port: u16) -> Result<Box<dyn Listener>, NetError>;

    /// Start resolving a host name in the background.
    fn start_resolve(&mut self, host: &str);

    /// Result of the background resolution, once available.
    fn poll_resolve(&mut self) -> Option<Result<Ipv4Addr, NetError>>;

    /// Ask a TLS server whether it supports a maximum fragment length.
    fn probe_max_fragment_length(&mut self, host: &str, port: u16, len: u16) -> bool;
}

// ============================================================================
// WiFi
// ============================================================================

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WifiMode {
    Off = 0,
    #[default]
    Station = 1,
    SoftAp = 2,
    StationSoftAp = 3,
}

impl WifiMode {
    /// Mode from its command argument number.
    pub fn from_number(value: u32) -> Option<Self> {
        match value {
            0 => Some(WifiMode::Off),
            1 => Some(WifiMode::Station),
            2 => Some(WifiMode::SoftAp),
            3 => Some(WifiMode::StationSoftAp),
            _ => None,
        }
    }

    /// Command argument number of this mode.
    pub fn number(&self) -> u8 {
        *self as u8
    }

    /// Whether the soft access point is running in this mode.
    pub fn has_soft_ap(&self) -> bool {
        matches!(self, WifiMode::SoftAp | WifiMode::StationSoftAp)
    }
}

/// Address, gateway and netmask of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfig {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl IpConfig {
    /// All-zero configuration.
    pub const UNSET: IpConfig = IpConfig {
        ip: Ipv4Addr::UNSPECIFIED,
        gateway: Ipv4Addr::UNSPECIFIED,
        netmask: Ipv4Addr::UNSPECIFIED,
    };

    /// Configuration for `ip` with a `.1` gateway on its /24.
    pub fn with_derived_gateway(ip: Ipv4Addr) -> Self {
        if ip.is_unspecified() {
            return IpConfig { ip, ..IpConfig::UNSET };
        }
        let [a, b, c, _] = ip.octets();
        IpConfig {
            ip,
            gateway: Ipv4Addr::new(a, b, c, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig::UNSET
    }
}

/// Parameters of an association request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub ssid: String,
    pub password: String,
    pub bssid: Option<[u8; 6]>,
}

/// Progress of an association request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    InProgress,
    Connected,
    /// Failed with the `+CWJAP:<code>` reason.
    Failed(u8),
}

/// The access point the station is associated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationInfo {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i32,
}

/// One access point found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Encryption type number.
    pub encryption: u8,
    pub ssid: String,
    pub rssi: i32,
    pub bssid: [u8; 6],
    pub channel: u8,
}

/// Soft access point configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftApConfig {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub encryption: u8,
    pub max_connections: u8,
    pub hidden: bool,
}

impl Default for SoftApConfig {
    fn default() -> Self {
        SoftApConfig {
            ssid: "ESP_ATMOD".to_string(),
            password: String::new(),
            channel: 1,
            encryption: 0,
            max_connections: 4,
            hidden: false,
        }
    }
}

/// Asynchronous station events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    Connected,
    GotIp,
    Disconnected(u8),
}

/// Radio and IP configuration.
pub trait WifiControl {
    fn mode(&self) -> WifiMode;
    fn set_mode(&mut self, mode: WifiMode, persistent: bool) -> bool;

    /// Whether the station is associated and has an address.
    fn is_connected(&self) -> bool;
    /// Current association, or the stored one when `stored` is set.
    fn station_info(&self, stored: bool) -> Option<StationInfo>;
    fn begin_join(&mut self, request: &JoinRequest, persistent: bool) -> bool;
    fn join_status(&mut self) -> JoinStatus;
    fn disconnect(&mut self);

    fn start_scan(&mut self);
    fn poll_scan(&mut self) -> Option<Vec<ScanResult>>;

    /// Soft AP configuration, or the stored one when `stored` is set.
    fn soft_ap_config(&self, stored: bool) -> SoftApConfig;
    fn set_soft_ap(&mut self, config: &SoftApConfig, persistent: bool) -> bool;

    fn station_ip(&self) -> IpConfig;
    /// Use a static configuration, or DHCP when `None`.
    fn set_station_ip(&mut self, config: Option<IpConfig>);
    fn soft_ap_ip(&self) -> IpConfig;
    fn set_soft_ap_ip(&mut self, config: IpConfig);

    fn dns_servers(&self) -> [Ipv4Addr; 2];
    fn set_dns_servers(&mut self, servers: [Ipv4Addr; 2]);

    fn station_mac(&self) -> [u8; 6];
    fn soft_ap_mac(&self) -> [u8; 6];

    fn hostname(&self) -> String;
    fn set_hostname(&mut self, name: &str) -> bool;

    fn auto_connect(&self) -> bool;
    fn set_auto_connect(&mut self, enabled: bool);

    fn phy_mode(&self) -> u8;
    fn set_phy_mode(&mut self, mode: u8);

    /// Next queued station event.
    fn poll_event(&mut self) -> Option<WifiEvent>;
}

// ============================================================================
// Clock, storage, system
// ============================================================================

/// Time source.
pub trait Clock {
    /// Monotonic milliseconds since start.
    fn millis(&self) -> u64;

    /// Block for a bounded time.
    fn delay(&mut self, duration: Duration);

    /// UTC seconds since the epoch, if known.
    fn unix_time(&self) -> Option<i64>;

    /// Apply an SNTP configuration.
    fn configure_sntp(&mut self, enabled: bool, timezone: i8, servers: &[String]);
}

/// The persistent settings block.
pub trait SettingsStorage {
    /// Raw block contents, if anything was stored.
    fn load(&mut self) -> Option<Vec<u8>>;

    /// Replace the block contents.
    fn store(&mut self, data: &[u8]) -> Result<(), StorageError>;
}

/// Device level controls.
pub trait SystemControl {
    /// Request a restart after the current output is flushed.
    fn restart(&mut self);

    /// Free heap in bytes.
    fn free_heap(&self) -> u32;

    fn sdk_version(&self) -> String;

    fn cpu_freq_mhz(&self) -> u32;
    fn set_cpu_freq_mhz(&mut self, mhz: u32) -> bool;

    /// Reconfigure the serial port after the reply is flushed.
    fn reconfigure_uart(&mut self, baud: u32, frame: u16);
}

/// The full set of collaborators an engine runs against.
pub struct Platform {
    pub net: Box<dyn NetworkStack>,
    pub wifi: Box<dyn WifiControl>,
    pub clock: Box<dyn Clock>,
    pub storage: Box<dyn SettingsStorage>,
    pub system: Box<dyn SystemControl>,
}

/// Format a hardware address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_gateway() {
        let cfg = IpConfig::with_derived_gateway(Ipv4Addr::new(10, 0, 7, 42));
        assert_eq!(cfg.gateway, Ipv4Addr::new(10, 0, 7, 1));
        assert_eq!(cfg.netmask, Ipv4Addr::new(255, 255, 255, 0));

        let unset = IpConfig::with_derived_gateway(Ipv4Addr::UNSPECIFIED);
        assert_eq!(unset, IpConfig::UNSET);
    }

    #[test]
    fn test_wifi_mode_numbers() {
        assert_eq!(WifiMode::from_number(3), Some(WifiMode::StationSoftAp));
        assert_eq!(WifiMode::from_number(4), None);
        assert_eq!(WifiMode::SoftAp.number(), 2);
        assert!(WifiMode::StationSoftAp.has_soft_ap());
        assert!(!WifiMode::Station.has_soft_ap());
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&[0x5c, 0xcf, 0x7f, 0, 1, 0xab]), "5c:cf:7f:00:01:ab");
    }
}
