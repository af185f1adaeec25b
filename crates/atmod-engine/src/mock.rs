//! In-memory collaborators.
//!
//! Every mock keeps its state behind an `Rc<RefCell<_>>` handle so a test
//! can script inputs and inspect effects while the engine owns the boxed
//! collaborator.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;
use std::time::Duration;

use atmod_cert::TrustCredentials;

use crate::error::{NetError, StorageError};
use crate::platform::{
    Clock, Connection, ConnectRequest, IpConfig, JoinRequest, JoinStatus, LinkKind, Listener,
    NetworkStack, Platform, ScanResult, SettingsStorage, SoftApConfig, StationInfo, SystemControl,
    WifiControl, WifiEvent, WifiMode,
};

// ============================================================================
// Network
// ============================================================================

/// Scripted state of one connection.
#[derive(Debug)]
pub struct ConnectionState {
    /// Bytes the peer has sent and the engine has not read yet.
    pub inbound: VecDeque<u8>,
    /// Every write call, in order.
    pub writes: Vec<Vec<u8>>,
    pub connected: bool,
    /// When false, `wait_writable` times out.
    pub writable: bool,
    /// When true, writes accept nothing while the link stays up.
    pub stalled: bool,
    pub closed: bool,
    pub remote: SocketAddrV4,
    pub local_port: u16,
    pub mfln: bool,
}

impl ConnectionState {
    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

/// A connection backed by [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct MockConnection {
    state: Rc<RefCell<ConnectionState>>,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        MockConnection {
            state: Rc::new(RefCell::new(ConnectionState {
                inbound: VecDeque::new(),
                writes: Vec::new(),
                connected: true,
                writable: true,
                stalled: false,
                closed: false,
                remote: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 80),
                local_port: 50000,
                mfln: false,
            })),
        }
    }

    pub fn handle(&self) -> Rc<RefCell<ConnectionState>> {
        Rc::clone(&self.state)
    }
}

impl Connection for MockConnection {
    fn connected(&self) -> bool {
        let state = self.state.borrow();
        state.connected && !state.closed
    }

    fn available(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, NetError> {
        let mut state = self.state.borrow_mut();
        if !state.connected || state.closed {
            return Err(NetError::Closed);
        }
        if state.stalled {
            return Ok(0);
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }

    fn wait_writable(&mut self, _timeout: Duration) -> bool {
        self.state.borrow().writable
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }

    fn remote_addr(&self) -> SocketAddrV4 {
        self.state.borrow().remote
    }

    fn local_port(&self) -> u16 {
        self.state.borrow().local_port
    }

    fn mfln_status(&self) -> bool {
        self.state.borrow().mfln
    }
}

/// One recorded connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRecord {
    pub kind: LinkKind,
    pub host: String,
    pub port: u16,
    /// `insecure`, `fingerprint`, `anchors:<n>` or empty for plain TCP.
    pub trust: String,
    pub buffer_size: usize,
}

/// Scripted network stack state.
#[derive(Debug, Default)]
pub struct NetworkState {
    /// Hosts whose resolution fails.
    pub unknown_hosts: Vec<String>,
    /// Refuse every connection attempt.
    pub refuse: bool,
    /// Connections handed out by the next connect calls, before fresh ones.
    pub prepared: VecDeque<MockConnection>,
    /// Handles of every connection handed out.
    pub opened: Vec<Rc<RefCell<ConnectionState>>>,
    pub connects: Vec<ConnectRecord>,
    /// Peers waiting on any listener.
    pub pending_peers: VecDeque<MockConnection>,
    /// Ports that cannot be listened on.
    pub busy_ports: Vec<u16>,
    pub listening: Vec<u16>,
    /// Host of the outstanding resolution.
    pub resolving: Option<String>,
    /// Answer delivered by the next `poll_resolve` while resolving.
    pub resolve_answer: Option<Result<Ipv4Addr, NetError>>,
    pub mfln_supported: bool,
}

/// Network stack backed by [`NetworkState`].
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl MockNetwork {
    pub fn handle(&self) -> Rc<RefCell<NetworkState>> {
        Rc::clone(&self.state)
    }
}

fn describe_trust(credentials: &TrustCredentials<'_>) -> String {
    match credentials {
        TrustCredentials::Insecure => "insecure".to_string(),
        TrustCredentials::Fingerprint(_) => "fingerprint".to_string(),
        TrustCredentials::Anchors(anchors) => format!("anchors:{}", anchors.len()),
    }
}

impl NetworkStack for MockNetwork {
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<Box<dyn Connection>, NetError> {
        let mut state = self.state.borrow_mut();
        state.connects.push(ConnectRecord {
            kind: request.kind,
            host: request.host.to_string(),
            port: request.port,
            trust: request.tls.map(|t| describe_trust(&t.credentials)).unwrap_or_default(),
            buffer_size: request.tls.map_or(0, |t| t.buffer_size),
        });

        if state.unknown_hosts.iter().any(|h| h == request.host) {
            return Err(NetError::Dns(request.host.to_string()));
        }
        if state.refuse {
            return Err(NetError::Connect {
                host: request.host.to_string(),
                port: request.port,
                reason: "refused".to_string(),
            });
        }

        let connection = state.prepared.pop_front().unwrap_or_default();
        state.opened.push(connection.handle());
        Ok(Box::new(connection))
    }

    fn listen(&mut self, port: u16) -> Result<Box<dyn Listener>, NetError> {
        let mut state = self.state.borrow_mut();
        if state.busy_ports.contains(&port) {
            return Err(NetError::Listen(port));
        }
        state.listening.push(port);
        Ok(Box::new(MockListener {
            port,
            network: Rc::clone(&self.state),
        }))
    }

    fn start_resolve(&mut self, host: &str) {
        self.state.borrow_mut().resolving = Some(host.to_string());
    }

    fn poll_resolve(&mut self) -> Option<Result<Ipv4Addr, NetError>> {
        let mut state = self.state.borrow_mut();
        state.resolving.as_ref()?;
        let answer = state.resolve_answer.take()?;
        state.resolving = None;
        Some(answer)
    }

    fn probe_max_fragment_length(&mut self, _host: &str, _port: u16, _len: u16) -> bool {
        self.state.borrow().mfln_supported
    }
}

/// Listener that hands out [`NetworkState::pending_peers`].
#[derive(Debug)]
pub struct MockListener {
    port: u16,
    network: Rc<RefCell<NetworkState>>,
}

impl Listener for MockListener {
    fn accept(&mut self) -> Option<Box<dyn Connection>> {
        let mut state = self.network.borrow_mut();
        let peer = state.pending_peers.pop_front()?;
        state.opened.push(peer.handle());
        Some(Box::new(peer))
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn close(&mut self) {
        let port = self.port;
        self.network.borrow_mut().listening.retain(|p| *p != port);
    }
}

// ============================================================================
// WiFi
// ============================================================================

/// Scripted radio state.
#[derive(Debug)]
pub struct WifiState {
    pub mode: WifiMode,
    pub connected: bool,
    pub station: Option<StationInfo>,
    pub stored_station: Option<StationInfo>,
    /// Statuses returned by successive `join_status` calls; the last one
    /// repeats.
    pub join_script: VecDeque<JoinStatus>,
    pub last_join: Option<(JoinRequest, bool)>,
    pub scanning: bool,
    /// Delivered by `poll_scan` once a scan was started.
    pub scan_results: Option<Vec<ScanResult>>,
    pub soft_ap: SoftApConfig,
    pub stored_soft_ap: SoftApConfig,
    pub station_ip: IpConfig,
    /// `None` means DHCP.
    pub static_ip: Option<IpConfig>,
    pub soft_ap_ip: IpConfig,
    pub dns: [Ipv4Addr; 2],
    pub station_mac: [u8; 6],
    pub soft_ap_mac: [u8; 6],
    pub hostname: String,
    pub auto_connect: bool,
    pub phy_mode: u8,
    pub events: VecDeque<WifiEvent>,
}

impl Default for WifiState {
    fn default() -> Self {
        WifiState {
            mode: WifiMode::Station,
            connected: false,
            station: None,
            stored_station: None,
            join_script: VecDeque::new(),
            last_join: None,
            scanning: false,
            scan_results: None,
            soft_ap: SoftApConfig::default(),
            stored_soft_ap: SoftApConfig::default(),
            station_ip: IpConfig::UNSET,
            static_ip: None,
            soft_ap_ip: IpConfig::UNSET,
            dns: [Ipv4Addr::UNSPECIFIED; 2],
            station_mac: [0x5c, 0xcf, 0x7f, 0x01, 0x02, 0x03],
            soft_ap_mac: [0x5e, 0xcf, 0x7f, 0x01, 0x02, 0x03],
            hostname: "ESP-010203".to_string(),
            auto_connect: true,
            phy_mode: 3,
            events: VecDeque::new(),
        }
    }
}

impl WifiState {
    /// Mark the station associated with `ssid` at `ip`.
    pub fn associate(&mut self, ssid: &str, ip: Ipv4Addr) {
        let info = StationInfo {
            ssid: ssid.to_string(),
            bssid: [0x10, 0x20, 0x30, 0x40, 0x50, 0x60],
            channel: 6,
            rssi: -55,
        };
        self.connected = true;
        self.station = Some(info.clone());
        self.stored_station = Some(info);
        self.station_ip = IpConfig::with_derived_gateway(ip);
    }
}

/// Radio backed by [`WifiState`].
#[derive(Debug, Clone, Default)]
pub struct MockWifi {
    state: Rc<RefCell<WifiState>>,
}

impl MockWifi {
    pub fn handle(&self) -> Rc<RefCell<WifiState>> {
        Rc::clone(&self.state)
    }
}

impl WifiControl for MockWifi {
    fn mode(&self) -> WifiMode {
        self.state.borrow().mode
    }

    fn set_mode(&mut self, mode: WifiMode, _persistent: bool) -> bool {
        self.state.borrow_mut().mode = mode;
        true
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn station_info(&self, stored: bool) -> Option<StationInfo> {
        let state = self.state.borrow();
        if stored {
            state.stored_station.clone()
        } else {
            state.station.clone()
        }
    }

    fn begin_join(&mut self, request: &JoinRequest, persistent: bool) -> bool {
        self.state.borrow_mut().last_join = Some((request.clone(), persistent));
        true
    }

    fn join_status(&mut self) -> JoinStatus {
        let mut state = self.state.borrow_mut();
        let status = if state.join_script.len() > 1 {
            state.join_script.pop_front()
        } else {
            state.join_script.front().copied()
        };
        let status = status.unwrap_or(JoinStatus::InProgress);
        if status == JoinStatus::Connected {
            let ssid = state
                .last_join
                .as_ref()
                .map(|(r, _)| r.ssid.clone())
                .unwrap_or_default();
            state.associate(&ssid, Ipv4Addr::new(192, 168, 1, 50));
        }
        status
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.station = None;
        state.station_ip = IpConfig::UNSET;
    }

    fn start_scan(&mut self) {
        self.state.borrow_mut().scanning = true;
    }

    fn poll_scan(&mut self) -> Option<Vec<ScanResult>> {
        let mut state = self.state.borrow_mut();
        if !state.scanning {
            return None;
        }
        let results = state.scan_results.take()?;
        state.scanning = false;
        Some(results)
    }

    fn soft_ap_config(&self, stored: bool) -> SoftApConfig {
        let state = self.state.borrow();
        if stored {
            state.stored_soft_ap.clone()
        } else {
            state.soft_ap.clone()
        }
    }

    fn set_soft_ap(&mut self, config: &SoftApConfig, persistent: bool) -> bool {
        let mut state = self.state.borrow_mut();
        state.soft_ap = config.clone();
        if persistent {
            state.stored_soft_ap = config.clone();
        }
        true
    }

    fn station_ip(&self) -> IpConfig {
        self.state.borrow().station_ip
    }

    fn set_station_ip(&mut self, config: Option<IpConfig>) {
        let mut state = self.state.borrow_mut();
        state.static_ip = config;
        if let Some(config) = config {
            state.station_ip = config;
        }
    }

    fn soft_ap_ip(&self) -> IpConfig {
        self.state.borrow().soft_ap_ip
    }

    fn set_soft_ap_ip(&mut self, config: IpConfig) {
        self.state.borrow_mut().soft_ap_ip = config;
    }

    fn dns_servers(&self) -> [Ipv4Addr; 2] {
        self.state.borrow().dns
    }

    fn set_dns_servers(&mut self, servers: [Ipv4Addr; 2]) {
        self.state.borrow_mut().dns = servers;
    }

    fn station_mac(&self) -> [u8; 6] {
        self.state.borrow().station_mac
    }

    fn soft_ap_mac(&self) -> [u8; 6] {
        self.state.borrow().soft_ap_mac
    }

    fn hostname(&self) -> String {
        self.state.borrow().hostname.clone()
    }

    fn set_hostname(&mut self, name: &str) -> bool {
        self.state.borrow_mut().hostname = name.to_string();
        true
    }

    fn auto_connect(&self) -> bool {
        self.state.borrow().auto_connect
    }

    fn set_auto_connect(&mut self, enabled: bool) {
        self.state.borrow_mut().auto_connect = enabled;
    }

    fn phy_mode(&self) -> u8 {
        self.state.borrow().phy_mode
    }

    fn set_phy_mode(&mut self, mode: u8) {
        self.state.borrow_mut().phy_mode = mode;
    }

    fn poll_event(&mut self) -> Option<WifiEvent> {
        self.state.borrow_mut().events.pop_front()
    }
}

// ============================================================================
// Clock, storage, system
// ============================================================================

#[derive(Debug, Default)]
pub struct ClockState {
    pub millis: u64,
    pub unix_time: Option<i64>,
    /// Last SNTP configuration applied.
    pub sntp: Option<(bool, i8, Vec<String>)>,
}

impl ClockState {
    pub fn advance(&mut self, ms: u64) {
        self.millis += ms;
    }
}

/// Manually advanced clock; `delay` moves time forward.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    state: Rc<RefCell<ClockState>>,
}

impl MockClock {
    pub fn handle(&self) -> Rc<RefCell<ClockState>> {
        Rc::clone(&self.state)
    }
}

impl Clock for MockClock {
    fn millis(&self) -> u64 {
        self.state.borrow().millis
    }

    fn delay(&mut self, duration: Duration) {
        self.state.borrow_mut().advance(duration.as_millis() as u64);
    }

    fn unix_time(&self) -> Option<i64> {
        self.state.borrow().unix_time
    }

    fn configure_sntp(&mut self, enabled: bool, timezone: i8, servers: &[String]) {
        self.state.borrow_mut().sntp = Some((enabled, timezone, servers.to_vec()));
    }
}

#[derive(Debug, Default)]
pub struct StorageState {
    pub block: Option<Vec<u8>>,
    pub writes: usize,
    pub fail: bool,
}

/// Settings block held in memory.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    state: Rc<RefCell<StorageState>>,
}

impl MockStorage {
    pub fn handle(&self) -> Rc<RefCell<StorageState>> {
        Rc::clone(&self.state)
    }
}

impl SettingsStorage for MockStorage {
    fn load(&mut self) -> Option<Vec<u8>> {
        self.state.borrow().block.clone()
    }

    fn store(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(StorageError::Io("write failed".to_string()));
        }
        state.block = Some(data.to_vec());
        state.writes += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SystemState {
    pub restarts: usize,
    pub free_heap: u32,
    pub cpu_freq_mhz: u32,
    pub uart: Option<(u32, u16)>,
}

impl Default for SystemState {
    fn default() -> Self {
        SystemState {
            restarts: 0,
            free_heap: 41_000,
            cpu_freq_mhz: 80,
            uart: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockSystem {
    state: Rc<RefCell<SystemState>>,
}

impl MockSystem {
    pub fn handle(&self) -> Rc<RefCell<SystemState>> {
        Rc::clone(&self.state)
    }
}

impl SystemControl for MockSystem {
    fn restart(&mut self) {
        self.state.borrow_mut().restarts += 1;
    }

    fn free_heap(&self) -> u32 {
        self.state.borrow().free_heap
    }

    fn sdk_version(&self) -> String {
        "mock".to_string()
    }

    fn cpu_freq_mhz(&self) -> u32 {
        self.state.borrow().cpu_freq_mhz
    }

    fn set_cpu_freq_mhz(&mut self, mhz: u32) -> bool {
        self.state.borrow_mut().cpu_freq_mhz = mhz;
        true
    }

    fn reconfigure_uart(&mut self, baud: u32, frame: u16) {
        self.state.borrow_mut().uart = Some((baud, frame));
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Handles to the state of every mock in a [`Platform`].
#[derive(Debug, Clone)]
pub struct MockHandles {
    pub net: Rc<RefCell<NetworkState>>,
    pub wifi: Rc<RefCell<WifiState>>,
    pub clock: Rc<RefCell<ClockState>>,
    pub storage: Rc<RefCell<StorageState>>,
    pub system: Rc<RefCell<SystemState>>,
}

/// Build a platform of fresh mocks.
pub fn mock_platform() -> (Platform, MockHandles) {
    let net = MockNetwork::default();
    let wifi = MockWifi::default();
    let clock = MockClock::default();
    let storage = MockStorage::default();
    let system = MockSystem::default();

    let handles = MockHandles {
        net: net.handle(),
        wifi: wifi.handle(),
        clock: clock.handle(),
        storage: storage.handle(),
        system: system.handle(),
    };

    let platform = Platform {
        net: Box::new(net),
        wifi: Box::new(wifi),
        clock: Box::new(clock),
        storage: Box::new(storage),
        system: Box::new(system),
    };

    (platform, handles)
}

// ============================================================================
// Certificates
// ============================================================================

pub use atmod_cert::fixtures::certificate_with_cn;
