//! The byte-stream state machine.
//!
//! An [`Engine`] owns every piece of modem state and the collaborators it
//! runs against. The host feeds it serial bytes, calls [`Engine::poll`] once
//! per loop turn and drains [`Engine::take_output`] back to the serial line.
//!
//! Incoming bytes are routed by [`SerialMode`]:
//!
//! - `Command`: bytes accumulate into a line; a `\n` dispatches it.
//! - `SendData`: bytes fill the payload of an armed `AT+CIPSEND`.
//! - `CertLoad`: bytes feed the PEM collector of `AT+CIPSSLCERT`.
//!
//! A mode change made while handling one byte applies from the next byte.

use std::mem;
use std::time::Duration;

use atmod_cert::pem::{CollectStatus, PemCollector};
use atmod_cert::{AddOutcome, CertificateStore, TrustConfig};
use atmod_protocol::{find_command, CommandLine, LineStatus, MSG_BUSY, MSG_ERROR, MSG_OK};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::connections::{ConnectionTable, PollContext};
use crate::error::CommandError;
use crate::handlers::{handler_for, render_scan, Invocation, Reply};
use crate::telemetry::metric_defs;
use crate::platform::{Platform, WifiEvent};
use crate::settings::{PersistentSettings, Settings};
use crate::state::{EngineConfig, RuntimeState};

/// How incoming bytes are interpreted.
#[derive(Debug)]
pub enum SerialMode {
    /// Bytes form command lines.
    Command,
    /// Bytes are payload for an armed link.
    SendData { link: u8, len: usize },
    /// Bytes are certificate text.
    CertLoad(PemCollector),
}

impl SerialMode {
    pub fn is_command(&self) -> bool {
        matches!(self, SerialMode::Command)
    }
}

/// An operation that completes on a later poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    /// `AT+CWJAP` association.
    Join { started: u64 },
    /// `AT+CWLAP` scan.
    Scan { started: u64 },
    /// `AT+CIPDOMAIN` lookup.
    Resolve { started: u64 },
}

/// The AT command engine.
pub struct Engine {
    pub(crate) platform: Platform,
    pub(crate) config: EngineConfig,
    pub(crate) state: RuntimeState,
    pub(crate) settings: PersistentSettings,
    pub(crate) links: ConnectionTable,
    pub(crate) certs: CertificateStore,
    pub(crate) trust: TrustConfig,
    pub(crate) mode: SerialMode,
    pub(crate) pending: Option<PendingOperation>,
    pub(crate) out: BytesMut,
    line: CommandLine,
    discard_line: bool,
    send_buffer: BytesMut,
    restart_requested: bool,
}

impl Engine {
    /// Build an engine, loading persisted settings and applying them.
    pub fn new(mut platform: Platform, config: EngineConfig) -> Self {
        let settings = PersistentSettings::load(platform.storage.as_mut());
        let stored = *settings.get();
        let state = RuntimeState::new(&config, &stored);
        let certs = CertificateStore::new(stored.max_certificates as usize);

        info!(
            baud = stored.uart_baud,
            dhcp = stored.dhcp_mode,
            max_certs = stored.max_certificates,
            "engine starting"
        );

        let mut engine = Engine {
            platform,
            send_buffer: BytesMut::with_capacity(config.max_send_length),
            config,
            state,
            settings,
            links: ConnectionTable::new(),
            certs,
            trust: TrustConfig::default(),
            mode: SerialMode::Command,
            pending: None,
            out: BytesMut::new(),
            line: CommandLine::new(),
            discard_line: false,
            restart_requested: false,
        };

        engine.apply_settings(&stored);
        engine
    }

    fn apply_settings(&mut self, stored: &Settings) {
        self.platform
            .system
            .reconfigure_uart(stored.uart_baud, stored.uart_frame);
        self.apply_dns();
        self.apply_dhcp();
        if self.platform.wifi.mode().has_soft_ap() {
            self.apply_soft_ap_ip();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn mode(&self) -> &SerialMode {
        &self.mode
    }

    pub fn pending(&self) -> Option<PendingOperation> {
        self.pending
    }

    pub fn links(&self) -> &ConnectionTable {
        &self.links
    }

    pub fn certificates(&self) -> &CertificateStore {
        &self.certs
    }

    pub fn trust(&self) -> &TrustConfig {
        &self.trust
    }

    pub fn settings(&self) -> &Settings {
        self.settings.get()
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether `AT+RST` or `AT+RESTORE` asked for a restart.
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// Take everything written for the serial line so far.
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    pub(crate) fn now(&self) -> u64 {
        self.platform.clock.millis()
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Process a chunk of serial input.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.process_byte(byte);
        }
    }

    /// Route one byte according to the current mode.
    pub fn process_byte(&mut self, byte: u8) {
        match self.mode {
            SerialMode::Command => self.command_byte(byte),
            SerialMode::SendData { link, len } => self.payload_byte(link, len, byte),
            SerialMode::CertLoad(_) => self.cert_byte(byte),
        }
    }

    fn command_byte(&mut self, byte: u8) {
        if self.discard_line {
            if byte == b'\n' {
                self.discard_line = false;
            }
            return;
        }

        if self.state.echo {
            self.out.put_u8(byte);
        }

        match self.line.push(byte) {
            Ok(LineStatus::Partial) => {}
            Ok(LineStatus::Complete) => {
                let line = self.line.take();
                self.complete_line(line);
            }
            Err(e) => {
                warn!("{}", e);
                self.out.put_slice(MSG_ERROR);
                self.discard_line = byte != b'\n';
            }
        }
    }

    fn complete_line(&mut self, line: Bytes) {
        if line.iter().all(|&b| b == b'\r' || b == b'\n') {
            return;
        }

        if self.pending.is_some() {
            debug!("busy, dropping {:?}", String::from_utf8_lossy(&line).trim_end());
            metrics::counter!(metric_defs::COMMANDS_BUSY.name).increment(1);
            self.out.put_slice(MSG_BUSY);
            return;
        }

        self.dispatch(line);
    }

    fn dispatch(&mut self, line: Bytes) {
        let Some(code) = find_command(&line) else {
            debug!("no command for {:?}", String::from_utf8_lossy(&line).trim_end());
            self.finish(Err(CommandError::Syntax));
            return;
        };

        trace!(?code, "dispatch");
        let invocation = Invocation::new(code, line);
        let result = handler_for(code)(self, &invocation);
        self.finish(result);
    }

    fn finish(&mut self, result: Result<Reply, CommandError>) {
        let outcome = match result {
            Ok(Reply::Ok) => {
                self.out.put_slice(MSG_OK);
                "ok"
            }
            Ok(Reply::Done) => "ok",
            Ok(Reply::Deferred) => "deferred",
            Ok(Reply::Restart) => {
                self.out.put_slice(MSG_OK);
                self.restart_requested = true;
                self.platform.system.restart();
                info!("restart requested");
                "ok"
            }
            Err(e) => {
                debug!("command failed: {}", e.kind());
                e.render(&mut self.out);
                e.kind()
            }
        };
        metrics::counter!(metric_defs::COMMANDS.name, "outcome" => outcome).increment(1);
    }

    // ========================================================================
    // Payload
    // ========================================================================

    /// Arm `link` for a payload of `len` bytes; the next bytes are payload.
    pub(crate) fn begin_send(&mut self, link: u8, len: usize) {
        self.send_buffer.clear();
        self.mode = SerialMode::SendData { link, len };
        debug!(link, len, "awaiting payload");
    }

    fn payload_byte(&mut self, link: u8, len: usize, byte: u8) {
        self.send_buffer.put_u8(byte);
        if self.send_buffer.len() < len {
            return;
        }

        let payload = self.send_buffer.split();
        let now = self.now();
        let result = self.links.send(link, &payload, now);
        self.links.disarm();
        self.mode = SerialMode::Command;

        self.out
            .put_slice(format!("\r\nRecv {} bytes\r\n", payload.len()).as_bytes());
        match result {
            Ok(()) => self.out.put_slice(b"\r\nSEND OK\r\n"),
            Err(e) => {
                warn!(link, "send failed: {}", e);
                self.out.put_slice(b"\r\nSEND FAIL\r\n");
            }
        }
    }

    // ========================================================================
    // Certificate loading
    // ========================================================================

    /// Start collecting certificate text.
    pub(crate) fn begin_cert_load(&mut self) {
        self.mode = SerialMode::CertLoad(PemCollector::new());
        debug!("awaiting certificate");
    }

    fn cert_byte(&mut self, byte: u8) {
        let SerialMode::CertLoad(collector) = &mut self.mode else {
            return;
        };

        match collector.push(byte) {
            CollectStatus::Pending => {}
            CollectStatus::Complete => {
                if let SerialMode::CertLoad(collector) = mem::replace(&mut self.mode, SerialMode::Command) {
                    self.finish_cert_load(collector);
                }
            }
            CollectStatus::Rejected(e) => {
                warn!("certificate load aborted: {}", e);
                metrics::counter!(metric_defs::CERT_LOADS.name, "outcome" => "invalid").increment(1);
                self.mode = SerialMode::Command;
                self.out.put_slice(MSG_ERROR);
                self.discard_line = byte != b'\n';
            }
        }
    }

    fn finish_cert_load(&mut self, collector: PemCollector) {
        self.out
            .put_slice(format!("Read {} bytes\r\n", collector.received()).as_bytes());

        let (outcome, result) = match collector.decode() {
            Ok(der) => match self.certs.add(der) {
                AddOutcome::Added(index) => {
                    info!(index, "certificate loaded");
                    ("added", Ok(()))
                }
                AddOutcome::Duplicate(index) => (
                    "duplicate",
                    Err(CommandError::Precondition(format!(
                        "Certificate already loaded as {}",
                        index
                    ))),
                ),
                AddOutcome::CapacityExceeded => (
                    "capacity",
                    Err(CommandError::Resource(format!(
                        "Reached the maximum of {} certificates",
                        self.certs.capacity()
                    ))),
                ),
            },
            Err(e) => {
                warn!("certificate rejected: {}", e);
                ("invalid", Err(CommandError::Precondition(e.to_string())))
            }
        };

        metrics::counter!(metric_defs::CERT_LOADS.name, "outcome" => outcome).increment(1);
        match result {
            Ok(()) => self.out.put_slice(MSG_OK),
            Err(e) => e.render(&mut self.out),
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// One loop turn: complete pending operations, report events and
    /// service links.
    pub fn poll(&mut self) {
        if self.mode.is_command() {
            self.poll_wifi_events();
        }

        self.poll_pending();

        if self.mode.is_command() {
            let ctx = PollContext {
                passive: self.state.passive_recv,
                show_remote: self.state.show_remote,
                max_server_connections: self.state.max_server_connections as usize,
                server_timeout_ms: self.state.server_timeout_ms,
            };
            let now = self.now();
            self.links.poll(&ctx, now, &mut self.out);
        }
    }

    fn poll_wifi_events(&mut self) {
        while let Some(event) = self.platform.wifi.poll_event() {
            debug!(?event, "wifi event");
            match event {
                WifiEvent::Connected => self.out.put_slice(b"WIFI CONNECTED\r\n"),
                WifiEvent::GotIp => self.out.put_slice(b"WIFI GOT IP\r\n"),
                WifiEvent::Disconnected(reason) => self
                    .out
                    .put_slice(format!("WIFI DISCONNECT ({})\r\n", reason).as_bytes()),
            }
        }
    }

    fn poll_pending(&mut self) {
        let Some(pending) = self.pending else {
            return;
        };
        let now = self.now();

        match pending {
            PendingOperation::Join { started } => {
                let timeout = self.config.join_timeout_secs * 1000;
                match self.platform.wifi.join_status() {
                    crate::platform::JoinStatus::Connected => {
                        info!("joined access point");
                        self.pending = None;
                        self.finish(Ok(Reply::Ok));
                    }
                    crate::platform::JoinStatus::Failed(reason) => {
                        warn!(reason, "join failed");
                        self.pending = None;
                        self.join_failed(reason);
                    }
                    crate::platform::JoinStatus::InProgress if now.saturating_sub(started) > timeout => {
                        warn!("join timed out");
                        self.platform.wifi.disconnect();
                        self.pending = None;
                        self.join_failed(1);
                    }
                    crate::platform::JoinStatus::InProgress => {}
                }
            }
            PendingOperation::Scan { started } => {
                if let Some(results) = self.platform.wifi.poll_scan() {
                    debug!(found = results.len(), "scan complete");
                    self.pending = None;
                    render_scan(&results, &self.state.scan, &mut self.out);
                    self.finish(Ok(Reply::Ok));
                } else if now.saturating_sub(started) > self.config.scan_timeout_secs * 1000 {
                    warn!("scan timed out");
                    self.pending = None;
                    self.finish(Err(CommandError::Rejected));
                }
            }
            PendingOperation::Resolve { started } => {
                let answer = match self.platform.net.poll_resolve() {
                    Some(answer) => Some(answer.map_err(|e| e.to_string())),
                    None if now.saturating_sub(started) > self.config.resolve_timeout_secs * 1000 => {
                        Some(Err("timed out".to_string()))
                    }
                    None => None,
                };
                match answer {
                    Some(Ok(ip)) => {
                        self.pending = None;
                        self.out.put_slice(format!("+CIPDOMAIN:{}\r\n", ip).as_bytes());
                        self.finish(Ok(Reply::Ok));
                    }
                    Some(Err(reason)) => {
                        debug!("lookup failed: {}", reason);
                        self.pending = None;
                        self.finish(Err(CommandError::precondition("DNS Fail")));
                    }
                    None => {}
                }
            }
        }
    }

    fn join_failed(&mut self, reason: u8) {
        self.out
            .put_slice(format!("+CWJAP:{}\r\n\r\nFAIL\r\n", reason).as_bytes());
        metrics::counter!(metric_defs::COMMANDS.name, "outcome" => "io").increment(1);
    }

    // ========================================================================
    // Shared helpers for handlers
    // ========================================================================

    /// Modify and persist the settings record; a failed write is logged.
    pub(crate) fn persist<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Settings),
    {
        if let Err(e) = self.settings.update(self.platform.storage.as_mut(), f) {
            warn!("settings not saved: {}", e);
        }
    }

    /// Restore default settings.
    pub(crate) fn reset_settings(&mut self) {
        if let Err(e) = self.settings.reset(self.platform.storage.as_mut()) {
            warn!("settings not reset: {}", e);
        }
    }

    /// Push the station addressing mode to the radio.
    pub(crate) fn apply_dhcp(&mut self) {
        if self.state.station_dhcp() {
            self.platform.wifi.set_station_ip(None);
        } else {
            self.platform.wifi.set_station_ip(Some(self.state.station_ip));
        }
    }

    /// Push user DNS servers to the radio, if any are set.
    pub(crate) fn apply_dns(&mut self) {
        if !self.state.dns[0].is_unspecified() {
            self.platform.wifi.set_dns_servers(self.state.dns);
        }
    }

    pub(crate) fn apply_soft_ap_ip(&mut self) {
        self.platform.wifi.set_soft_ap_ip(self.state.soft_ap_ip);
    }

    /// Wait up to the disconnect timeout for the station to drop.
    pub(crate) fn wait_disconnected(&mut self) -> bool {
        let deadline = self.now() + self.config.disconnect_timeout_secs * 1000;
        while self.platform.wifi.is_connected() && self.now() < deadline {
            self.platform.clock.delay(Duration::from_millis(50));
        }
        !self.platform.wifi.is_connected()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("mode", &self.mode)
            .field("pending", &self.pending)
            .field("links", &self.links.links().count())
            .field("certificates", &self.certs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_platform, MockHandles};

    fn engine() -> (Engine, MockHandles) {
        let (platform, handles) = mock_platform();
        let config = EngineConfig {
            echo: false,
            ..EngineConfig::default()
        };
        (Engine::new(platform, config), handles)
    }

    fn run(engine: &mut Engine, input: &[u8]) -> Vec<u8> {
        engine.feed(input);
        engine.take_output().to_vec()
    }

    #[test]
    fn test_bare_at() {
        let (mut engine, _) = engine();
        assert_eq!(run(&mut engine, b"AT\r\n"), MSG_OK);
    }

    #[test]
    fn test_unknown_command() {
        let (mut engine, _) = engine();
        assert_eq!(run(&mut engine, b"AT+BOGUS\r\n"), MSG_ERROR);
        assert_eq!(run(&mut engine, b"HELLO\r\n"), MSG_ERROR);
    }

    #[test]
    fn test_bare_cr_does_not_end_line() {
        let (mut engine, _) = engine();
        assert!(run(&mut engine, b"AT\r").is_empty());
        assert_eq!(run(&mut engine, b"\n"), MSG_OK);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let (mut engine, _) = engine();
        assert!(run(&mut engine, b"\r\n\n").is_empty());
    }

    #[test]
    fn test_echo() {
        let (platform, _) = mock_platform();
        let mut engine = Engine::new(platform, EngineConfig::default());
        assert_eq!(run(&mut engine, b"AT\r\n"), b"AT\r\n\r\nOK\r\n");
    }

    #[test]
    fn test_line_overflow_discards_rest_of_line() {
        let (mut engine, _) = engine();
        let mut input = vec![b'A'; 300];
        input.extend_from_slice(b"\r\nAT\r\n");
        assert_eq!(run(&mut engine, &input), [MSG_ERROR, MSG_OK].concat());
    }

    #[test]
    fn test_busy_while_pending() {
        let (mut engine, _) = engine();
        engine.pending = Some(PendingOperation::Scan { started: 0 });
        assert_eq!(run(&mut engine, b"AT\r\n"), MSG_BUSY);
    }

    #[test]
    fn test_restart_flushes_ok_first() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, b"AT+RST\r\n"), MSG_OK);
        assert!(engine.restart_requested());
        assert_eq!(handles.system.borrow().restarts, 1);
    }

    #[test]
    fn test_wifi_events_reported() {
        let (mut engine, handles) = engine();
        {
            let mut wifi = handles.wifi.borrow_mut();
            wifi.events.push_back(WifiEvent::Connected);
            wifi.events.push_back(WifiEvent::Disconnected(8));
        }
        engine.poll();
        assert_eq!(
            &engine.take_output()[..],
            b"WIFI CONNECTED\r\nWIFI DISCONNECT (8)\r\n"
        );
    }

    #[test]
    fn test_stored_settings_applied() {
        let (platform, handles) = mock_platform();
        let stored = Settings {
            max_certificates: 2,
            dhcp_mode: 1,
            ..Settings::default()
        };
        handles.storage.borrow_mut().block = Some(stored.encode().to_vec());

        let engine = Engine::new(platform, EngineConfig::default());
        assert_eq!(engine.certificates().capacity(), 2);
        assert!(handles.wifi.borrow().static_ip.is_some());
        assert_eq!(handles.system.borrow().uart, Some((115_200, 0x1c)));
    }
}
