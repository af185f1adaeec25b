//! Engine construction options and runtime (non-persisted) state.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::platform::IpConfig;
use crate::settings::Settings;

/// Engine construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Echo command bytes after start.
    pub echo: bool,
    /// Give up on an association after this long.
    pub join_timeout_secs: u64,
    /// Give up on a `AT+CIPDOMAIN` lookup after this long.
    pub resolve_timeout_secs: u64,
    /// Give up on a network scan after this long.
    pub scan_timeout_secs: u64,
    /// Longest wait for a disconnect before a new association.
    pub disconnect_timeout_secs: u64,
    /// Largest `AT+CIPSEND` payload.
    pub max_send_length: usize,
    /// Port used by `AT+CIPSERVER=1` without a port.
    pub default_server_port: u16,
    /// Initial `AT+CIPSTO` value.
    pub server_timeout_secs: u64,
    /// Initial `AT+CIPSERVERMAXCONN` value.
    pub max_server_connections: u8,
    /// Reported by `AT+GMR`.
    pub firmware_version: String,
    /// Reported by `AT+GMR`.
    pub build_time: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            echo: true,
            join_timeout_secs: 20,
            resolve_timeout_secs: 10,
            scan_timeout_secs: 15,
            disconnect_timeout_secs: 5,
            max_send_length: 2048,
            default_server_port: 333,
            server_timeout_secs: 180,
            max_server_connections: 5,
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: "unknown".to_string(),
        }
    }
}

/// SNTP settings from `AT+CIPSNTPCFG`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SntpConfig {
    pub enabled: bool,
    /// Hours east of UTC.
    pub timezone: i8,
    pub servers: Vec<String>,
}

/// `AT+CWLAPOPT` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub sort_by_rssi: bool,
    /// Bit per printed field, lowest bit first.
    pub print_mask: u32,
    /// Only networks stronger than this are listed.
    pub rssi_filter: i32,
    /// Bit per listed encryption type.
    pub auth_mask: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            sort_by_rssi: false,
            print_mask: 0x7ff,
            rssi_filter: -100,
            auth_mask: 0xffff,
        }
    }
}

/// Process-wide settings that live until restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
    pub echo: bool,
    /// Serial settings in effect, which `_CUR` changes leave unsaved.
    pub uart_baud: u32,
    pub uart_frame: u16,
    /// `AT+CIPDINFO`: append remote address to `+IPD`.
    pub show_remote: bool,
    /// `AT+CIPRECVMODE=1`.
    pub passive_recv: bool,
    /// `AT+CWDHCP` bits; bit 1 is station DHCP.
    pub dhcp_mode: u8,
    /// Static station configuration used while DHCP is off.
    pub station_ip: IpConfig,
    pub soft_ap_ip: IpConfig,
    pub dns: [Ipv4Addr; 2],
    pub sntp: SntpConfig,
    pub max_server_connections: u8,
    pub server_timeout_ms: u64,
    /// A link was opened since start (`STATUS:4` vs `STATUS:2`).
    pub was_connected: bool,
    pub scan: ScanOptions,
}

impl RuntimeState {
    /// Initial state from the construction options and stored settings.
    pub fn new(config: &EngineConfig, settings: &Settings) -> Self {
        RuntimeState {
            echo: config.echo,
            uart_baud: settings.uart_baud,
            uart_frame: settings.uart_frame,
            show_remote: false,
            passive_recv: false,
            dhcp_mode: settings.dhcp_mode,
            station_ip: settings.station,
            soft_ap_ip: settings.soft_ap,
            dns: settings.dns,
            sntp: SntpConfig::default(),
            max_server_connections: config.max_server_connections,
            server_timeout_ms: config.server_timeout_secs * 1000,
            was_connected: false,
            scan: ScanOptions::default(),
        }
    }

    /// Whether the station obtains its address by DHCP.
    pub fn station_dhcp(&self) -> bool {
        self.dhcp_mode & 2 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_send_length, 2048);
        assert_eq!(config.default_server_port, 333);
    }

    #[test]
    fn test_runtime_from_settings() {
        let settings = Settings {
            dhcp_mode: 1,
            ..Settings::default()
        };
        let state = RuntimeState::new(&EngineConfig::default(), &settings);
        assert!(!state.station_dhcp());
        assert_eq!(state.server_timeout_ms, 180_000);
        assert_eq!(state.soft_ap_ip.ip, Ipv4Addr::new(192, 168, 4, 1));
    }
}
