//! Host implementations of the engine collaborators.
//!
//! Links are plain `std::net` TCP sockets polled without blocking. TLS and
//! UDP are not available on the host and fail with a diagnostic. The radio
//! is simulated from a [`WifiProfile`], settings live in a file and the wall
//! clock comes from `chrono`.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{
    Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use atmod_engine::platform::{
    Clock, ConnectRequest, Connection, IpConfig, JoinRequest, JoinStatus, LinkKind, Listener,
    NetworkStack, ScanResult, SettingsStorage, SoftApConfig, StationInfo, SystemControl,
    WifiControl, WifiEvent, WifiMode,
};
use atmod_engine::{NetError, Platform, StorageError};
use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::RunnerResult;
use crate::profile::{parse_mac, RunnerProfile, WifiProfile};

/// How long an outgoing TCP connect may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes inspected when checking for pending input.
const PEEK_WINDOW: usize = 4096;

/// `+CWJAP` reason: wrong password.
const JOIN_WRONG_PASSWORD: u8 = 2;
/// `+CWJAP` reason: access point not found.
const JOIN_NOT_FOUND: u8 = 3;
/// `WIFI DISCONNECT` reason: left on request.
const REASON_ASSOC_LEAVE: u8 = 8;

/// Build a complete platform for one engine lifetime.
pub fn host_platform(profile: &RunnerProfile, settings_path: PathBuf) -> RunnerResult<Platform> {
    Ok(Platform {
        net: Box::new(HostNetwork::default()),
        wifi: Box::new(HostWifi::new(&profile.wifi)?),
        clock: Box::new(HostClock::new()),
        storage: Box::new(FileStorage::new(settings_path)),
        system: Box::new(HostSystem::default()),
    })
}

// ============================================================================
// Network
// ============================================================================

/// A TCP link over a non-blocking socket.
pub struct HostConnection {
    stream: TcpStream,
    remote: SocketAddrV4,
    local_port: u16,
    closed: Cell<bool>,
}

impl HostConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let remote = match stream.peer_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        };
        let local_port = stream.local_addr()?.port();
        Ok(HostConnection {
            stream,
            remote,
            local_port,
            closed: Cell::new(false),
        })
    }

    /// Bytes waiting in the socket; marks the link closed on EOF.
    fn peek_pending(&self) -> usize {
        if self.closed.get() {
            return 0;
        }
        let mut window = [0u8; PEEK_WINDOW];
        match self.stream.peek(&mut window) {
            Ok(0) => {
                self.closed.set(true);
                0
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(_) => {
                self.closed.set(true);
                0
            }
        }
    }
}

impl Connection for HostConnection {
    fn connected(&self) -> bool {
        self.peek_pending();
        !self.closed.get()
    }

    fn available(&self) -> usize {
        self.peek_pending()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() || self.closed.get() {
            return 0;
        }
        match self.stream.read(buf) {
            Ok(0) => {
                self.closed.set(true);
                0
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                debug!(peer = %self.remote, error = %e, "read failed");
                self.closed.set(true);
                0
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, NetError> {
        if self.closed.get() {
            return Err(NetError::Closed);
        }
        match self.stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                debug!(peer = %self.remote, error = %e, "write failed");
                self.closed.set(true);
                Err(NetError::Closed)
            }
        }
    }

    fn wait_writable(&mut self, timeout: Duration) -> bool {
        // std sockets cannot report writability; back off once.
        if self.closed.get() {
            return false;
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        true
    }

    fn close(&mut self) {
        if !self.closed.replace(true) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn remote_addr(&self) -> SocketAddrV4 {
        self.remote
    }

    fn local_port(&self) -> u16 {
        self.local_port
    }
}

/// A non-blocking listening socket.
pub struct HostListener {
    listener: Option<TcpListener>,
    port: u16,
}

impl Listener for HostListener {
    fn accept(&mut self) -> Option<Box<dyn Connection>> {
        let listener = self.listener.as_ref()?;
        match listener.accept() {
            Ok((stream, peer)) => match HostConnection::new(stream) {
                Ok(connection) => {
                    debug!(port = self.port, %peer, "accepted");
                    Some(Box::new(connection))
                }
                Err(e) => {
                    warn!(port = self.port, error = %e, "cannot configure accepted socket");
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(port = self.port, error = %e, "accept failed");
                None
            }
        }
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn close(&mut self) {
        self.listener = None;
    }
}

/// Outgoing TCP plus background name resolution.
#[derive(Default)]
pub struct HostNetwork {
    resolving: Option<Receiver<Result<Ipv4Addr, NetError>>>,
}

/// First IPv4 address of `host`.
fn resolve_v4(host: &str, port: u16) -> Result<SocketAddrV4, NetError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| NetError::Dns(host.to_string()))?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| NetError::Dns(host.to_string()))
}

impl NetworkStack for HostNetwork {
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>, NetError> {
        match request.kind {
            LinkKind::Tcp => {}
            LinkKind::Udp => return Err(NetError::Unsupported("UDP links")),
            LinkKind::Ssl => return Err(NetError::Unsupported("TLS links")),
        }

        let addr = resolve_v4(request.host, request.port)?;
        let connect_error = |reason: String| NetError::Connect {
            host: request.host.to_string(),
            port: request.port,
            reason,
        };
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), CONNECT_TIMEOUT)
            .map_err(|e| connect_error(e.to_string()))?;
        let connection = HostConnection::new(stream).map_err(|e| connect_error(e.to_string()))?;

        info!(host = request.host, %addr, "link connected");
        Ok(Box::new(connection))
    }

    fn listen(&mut self, port: u16) -> Result<Box<dyn Listener>, NetError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
            .map_err(|e| {
                warn!(port, error = %e, "listen failed");
                NetError::Listen(port)
            })?;
        info!(port, "server listening");
        Ok(Box::new(HostListener {
            listener: Some(listener),
            port,
        }))
    }

    fn start_resolve(&mut self, host: &str) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let host = host.to_string();
        let spawned = thread::Builder::new()
            .name("atmod-resolve".to_string())
            .spawn(move || {
                let result = resolve_v4(&host, 0).map(|addr| *addr.ip());
                let _ = tx.send(result);
            });
        match spawned {
            Ok(_) => self.resolving = Some(rx),
            Err(e) => {
                warn!(error = %e, "cannot start resolver thread");
                let (tx, rx) = crossbeam_channel::bounded(1);
                let _ = tx.send(Err(NetError::Unsupported("resolver unavailable")));
                self.resolving = Some(rx);
            }
        }
    }

    fn poll_resolve(&mut self) -> Option<Result<Ipv4Addr, NetError>> {
        let rx = self.resolving.as_ref()?;
        match rx.try_recv() {
            Ok(result) => {
                self.resolving = None;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.resolving = None;
                Some(Err(NetError::Unsupported("resolver stopped")))
            }
        }
    }

    fn probe_max_fragment_length(&mut self, host: &str, _port: u16, len: u16) -> bool {
        debug!(host, len, "MFLN probe unsupported on host");
        false
    }
}

// ============================================================================
// WiFi
// ============================================================================

/// Radio simulated from a profile.
pub struct HostWifi {
    profile: WifiProfile,
    station_mac: [u8; 6],
    soft_ap_mac: [u8; 6],
    neighbour_bssids: Vec<[u8; 6]>,
    mode: WifiMode,
    connected: bool,
    joining: Option<JoinRequest>,
    scanning: bool,
    soft_ap: SoftApConfig,
    stored_soft_ap: SoftApConfig,
    static_ip: Option<IpConfig>,
    soft_ap_ip: IpConfig,
    dns: [Ipv4Addr; 2],
    hostname: String,
    auto_connect: bool,
    phy_mode: u8,
    events: VecDeque<WifiEvent>,
}

impl HostWifi {
    pub fn new(profile: &WifiProfile) -> RunnerResult<Self> {
        let neighbour_bssids = profile
            .neighbours
            .iter()
            .map(|n| parse_mac(&n.bssid))
            .collect::<RunnerResult<Vec<_>>>()?;
        Ok(HostWifi {
            station_mac: parse_mac(&profile.mac)?,
            soft_ap_mac: parse_mac(&profile.soft_ap_mac)?,
            neighbour_bssids,
            mode: WifiMode::Station,
            connected: profile.connected,
            joining: None,
            scanning: false,
            soft_ap: SoftApConfig::default(),
            stored_soft_ap: SoftApConfig::default(),
            static_ip: None,
            soft_ap_ip: IpConfig::with_derived_gateway(Ipv4Addr::new(192, 168, 4, 1)),
            dns: profile.dns,
            hostname: profile.hostname.clone(),
            auto_connect: true,
            phy_mode: 3,
            events: VecDeque::new(),
            profile: profile.clone(),
        })
    }

    /// The access point the profile's network appears as.
    fn home_station(&self) -> StationInfo {
        let mut bssid = self.station_mac;
        bssid[0] ^= 0x02;
        StationInfo {
            ssid: self.profile.ssid.clone(),
            bssid,
            channel: self.profile.channel,
            rssi: self.profile.rssi,
        }
    }
}

impl WifiControl for HostWifi {
    fn mode(&self) -> WifiMode {
        self.mode
    }

    fn set_mode(&mut self, mode: WifiMode, _persistent: bool) -> bool {
        self.mode = mode;
        true
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn station_info(&self, stored: bool) -> Option<StationInfo> {
        (stored || self.connected).then(|| self.home_station())
    }

    fn begin_join(&mut self, request: &JoinRequest, _persistent: bool) -> bool {
        info!(ssid = %request.ssid, "join requested");
        self.connected = false;
        self.joining = Some(request.clone());
        true
    }

    fn join_status(&mut self) -> JoinStatus {
        let Some(request) = self.joining.take() else {
            return if self.connected {
                JoinStatus::Connected
            } else {
                JoinStatus::Failed(JOIN_NOT_FOUND)
            };
        };

        if request.ssid != self.profile.ssid {
            return JoinStatus::Failed(JOIN_NOT_FOUND);
        }
        if !self.profile.password.is_empty() && request.password != self.profile.password {
            return JoinStatus::Failed(JOIN_WRONG_PASSWORD);
        }
        self.connected = true;
        self.events.push_back(WifiEvent::Connected);
        self.events.push_back(WifiEvent::GotIp);
        JoinStatus::Connected
    }

    fn disconnect(&mut self) {
        self.joining = None;
        if self.connected {
            self.connected = false;
            self.events
                .push_back(WifiEvent::Disconnected(REASON_ASSOC_LEAVE));
        }
    }

    fn start_scan(&mut self) {
        self.scanning = true;
    }

    fn poll_scan(&mut self) -> Option<Vec<ScanResult>> {
        if !self.scanning {
            return None;
        }
        self.scanning = false;

        let home = self.home_station();
        let mut results = vec![ScanResult {
            encryption: if self.profile.password.is_empty() { 0 } else { 3 },
            ssid: home.ssid,
            rssi: home.rssi,
            bssid: home.bssid,
            channel: home.channel,
        }];
        results.extend(
            self.profile
                .neighbours
                .iter()
                .zip(&self.neighbour_bssids)
                .map(|(n, bssid)| ScanResult {
                    encryption: n.encryption,
                    ssid: n.ssid.clone(),
                    rssi: n.rssi,
                    bssid: *bssid,
                    channel: n.channel,
                }),
        );
        Some(results)
    }

    fn soft_ap_config(&self, stored: bool) -> SoftApConfig {
        if stored {
            self.stored_soft_ap.clone()
        } else {
            self.soft_ap.clone()
        }
    }

    fn set_soft_ap(&mut self, config: &SoftApConfig, persistent: bool) -> bool {
        self.soft_ap = config.clone();
        if persistent {
            self.stored_soft_ap = config.clone();
        }
        true
    }

    fn station_ip(&self) -> IpConfig {
        if !self.connected {
            return IpConfig::UNSET;
        }
        self.static_ip
            .unwrap_or_else(|| IpConfig::with_derived_gateway(self.profile.ip))
    }

    fn set_station_ip(&mut self, config: Option<IpConfig>) {
        self.static_ip = config;
    }

    fn soft_ap_ip(&self) -> IpConfig {
        if self.mode.has_soft_ap() {
            self.soft_ap_ip
        } else {
            IpConfig::UNSET
        }
    }

    fn set_soft_ap_ip(&mut self, config: IpConfig) {
        self.soft_ap_ip = config;
    }

    fn dns_servers(&self) -> [Ipv4Addr; 2] {
        self.dns
    }

    fn set_dns_servers(&mut self, servers: [Ipv4Addr; 2]) {
        self.dns = servers;
    }

    fn station_mac(&self) -> [u8; 6] {
        self.station_mac
    }

    fn soft_ap_mac(&self) -> [u8; 6] {
        self.soft_ap_mac
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn set_hostname(&mut self, name: &str) -> bool {
        self.hostname = name.to_string();
        true
    }

    fn auto_connect(&self) -> bool {
        self.auto_connect
    }

    fn set_auto_connect(&mut self, enabled: bool) {
        self.auto_connect = enabled;
    }

    fn phy_mode(&self) -> u8 {
        self.phy_mode
    }

    fn set_phy_mode(&mut self, mode: u8) {
        self.phy_mode = mode;
    }

    fn poll_event(&mut self) -> Option<WifiEvent> {
        self.events.pop_front()
    }
}

// ============================================================================
// Clock, storage, system
// ============================================================================

/// Monotonic time from process start, wall time from the system clock.
pub struct HostClock {
    started: Instant,
    sntp_enabled: bool,
}

impl HostClock {
    pub fn new() -> Self {
        HostClock {
            started: Instant::now(),
            sntp_enabled: false,
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn unix_time(&self) -> Option<i64> {
        Some(chrono::Utc::now().timestamp())
    }

    fn configure_sntp(&mut self, enabled: bool, timezone: i8, servers: &[String]) {
        // The host clock is already synchronised by the OS.
        if enabled != self.sntp_enabled {
            info!(enabled, timezone, ?servers, "SNTP configuration changed");
        }
        self.sntp_enabled = enabled;
    }
}

/// Settings block kept in a file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        FileStorage { path }
    }
}

impl SettingsStorage for FileStorage {
    fn load(&mut self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read settings");
                None
            }
        }
    }

    fn store(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        fs::write(&self.path, data).map_err(|e| StorageError::Io(e.to_string()))?;
        debug!(path = %self.path.display(), len = data.len(), "settings stored");
        Ok(())
    }
}

/// Device controls of the host process.
pub struct HostSystem {
    cpu_freq_mhz: u32,
}

impl Default for HostSystem {
    fn default() -> Self {
        HostSystem { cpu_freq_mhz: 80 }
    }
}

impl SystemControl for HostSystem {
    fn restart(&mut self) {
        info!("restart requested");
    }

    fn free_heap(&self) -> u32 {
        // Typical for a freshly booted module.
        45_000
    }

    fn sdk_version(&self) -> String {
        format!("host-{}", env!("CARGO_PKG_VERSION"))
    }

    fn cpu_freq_mhz(&self) -> u32 {
        self.cpu_freq_mhz
    }

    fn set_cpu_freq_mhz(&mut self, mhz: u32) -> bool {
        if mhz != 80 && mhz != 160 {
            return false;
        }
        self.cpu_freq_mhz = mhz;
        true
    }

    fn reconfigure_uart(&mut self, baud: u32, frame: u16) {
        debug!(baud, frame, "UART settings ignored on TCP serial");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wifi() -> HostWifi {
        let profile = WifiProfile {
            ssid: "lab".to_string(),
            password: "secret".to_string(),
            connected: false,
            ..WifiProfile::default()
        };
        HostWifi::new(&profile).unwrap()
    }

    fn join(wifi: &mut HostWifi, ssid: &str, password: &str) -> JoinStatus {
        let request = JoinRequest {
            ssid: ssid.to_string(),
            password: password.to_string(),
            bssid: None,
        };
        wifi.begin_join(&request, false);
        wifi.join_status()
    }

    #[test]
    fn test_join_profile_network() {
        let mut wifi = wifi();
        assert_eq!(wifi.station_ip(), IpConfig::UNSET);
        assert_eq!(join(&mut wifi, "lab", "secret"), JoinStatus::Connected);
        assert!(wifi.is_connected());
        assert_eq!(wifi.poll_event(), Some(WifiEvent::Connected));
        assert_eq!(wifi.poll_event(), Some(WifiEvent::GotIp));
        assert_eq!(wifi.station_ip().ip, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_join_failures() {
        let mut wifi = wifi();
        assert_eq!(join(&mut wifi, "lab", "wrong"), JoinStatus::Failed(2));
        assert_eq!(join(&mut wifi, "elsewhere", "secret"), JoinStatus::Failed(3));
        assert!(!wifi.is_connected());
    }

    #[test]
    fn test_disconnect_event() {
        let mut wifi = wifi();
        join(&mut wifi, "lab", "secret");
        wifi.events.clear();
        wifi.disconnect();
        assert_eq!(wifi.poll_event(), Some(WifiEvent::Disconnected(8)));
        wifi.disconnect();
        assert_eq!(wifi.poll_event(), None);
    }

    #[test]
    fn test_scan_lists_profile_networks() {
        let mut profile = WifiProfile::default();
        profile.neighbours.push(crate::profile::NeighbourProfile {
            ssid: "guest".to_string(),
            bssid: "aa:bb:cc:dd:ee:01".to_string(),
            ..Default::default()
        });
        let mut wifi = HostWifi::new(&profile).unwrap();

        assert!(wifi.poll_scan().is_none());
        wifi.start_scan();
        let results = wifi.poll_scan().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ssid, "atmod-host");
        assert_eq!(results[0].encryption, 0);
        assert_eq!(results[1].bssid, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = std::env::temp_dir().join(format!("atmod-storage-{}", std::process::id()));
        let mut storage = FileStorage::new(dir.join("settings.bin"));
        assert_eq!(storage.load(), None);

        storage.store(&[1, 2, 3]).unwrap();
        assert_eq!(storage.load(), Some(vec![1, 2, 3]));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tls_and_udp_unsupported() {
        let mut net = HostNetwork::default();
        for kind in [LinkKind::Udp, LinkKind::Ssl] {
            let request = ConnectRequest {
                kind,
                host: "127.0.0.1",
                port: 1,
                tls: None,
            };
            assert!(matches!(net.connect(&request), Err(NetError::Unsupported(_))));
        }
    }

    #[test]
    fn test_tcp_link_over_loopback() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let mut net = HostNetwork::default();
        let request = ConnectRequest {
            kind: LinkKind::Tcp,
            host: "127.0.0.1",
            port,
            tls: None,
        };
        let mut link = net.connect(&request).unwrap();
        let (mut peer, _) = server.accept().unwrap();

        assert!(link.connected());
        assert_eq!(link.remote_addr().port(), port);

        peer.write_all(b"hello").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while link.available() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let mut buf = [0u8; 16];
        assert_eq!(link.read(&mut buf), 5);
        assert_eq!(&buf[..5], b"hello");

        assert_eq!(link.write(b"world").unwrap(), 5);
        let mut echoed = [0u8; 5];
        peer.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"world");

        drop(peer);
        let deadline = Instant::now() + Duration::from_secs(2);
        while link.connected() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!link.connected());
    }
}
