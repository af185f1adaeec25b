//! YAML profile describing the simulated radio.
//!
//! A host has no radio, so the runner pretends to be associated with the
//! networks listed here. Every field has a default; an empty file is a valid
//! profile.
//!
//! ```yaml
//! wifi:
//!   ssid: lab
//!   password: secret
//!   ip: 192.168.1.40
//!   mac: "5c:cf:7f:00:00:01"
//!   hostname: atmod-host
//!   connected: true
//!   neighbours:
//!     - ssid: guest
//!       rssi: -71
//!       channel: 11
//! engine:
//!   echo: true
//!   max_send_length: 2048
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use atmod_engine::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Top level of a profile file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerProfile {
    pub wifi: WifiProfile,
    pub engine: EngineConfig,
}

/// The network the host pretends to be on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiProfile {
    /// Network accepted by `AT+CWJAP`.
    pub ssid: String,
    /// Required password; empty accepts any.
    pub password: String,
    /// Whether the station starts associated.
    pub connected: bool,
    pub ip: Ipv4Addr,
    pub mac: String,
    pub soft_ap_mac: String,
    pub hostname: String,
    pub dns: [Ipv4Addr; 2],
    pub channel: u8,
    pub rssi: i32,
    /// Extra access points reported by scans.
    pub neighbours: Vec<NeighbourProfile>,
}

impl Default for WifiProfile {
    fn default() -> Self {
        WifiProfile {
            ssid: "atmod-host".to_string(),
            password: String::new(),
            connected: true,
            ip: Ipv4Addr::LOCALHOST,
            mac: "5c:cf:7f:00:00:01".to_string(),
            soft_ap_mac: "5e:cf:7f:00:00:01".to_string(),
            hostname: "ESP-000001".to_string(),
            dns: [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)],
            channel: 6,
            rssi: -50,
            neighbours: Vec::new(),
        }
    }
}

/// An access point that only shows up in scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighbourProfile {
    pub ssid: String,
    pub rssi: i32,
    pub channel: u8,
    /// Encryption type number as reported by `AT+CWLAP`.
    pub encryption: u8,
    pub bssid: String,
}

impl Default for NeighbourProfile {
    fn default() -> Self {
        NeighbourProfile {
            ssid: String::new(),
            rssi: -80,
            channel: 1,
            encryption: 3,
            bssid: "00:00:00:00:00:00".to_string(),
        }
    }
}

impl RunnerProfile {
    /// Read a profile from a YAML file.
    pub fn load(path: &Path) -> RunnerResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| RunnerError::ProfileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| RunnerError::ProfileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a profile from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(RunnerProfile::default());
        }
        serde_yaml::from_str(text)
    }

    /// Check that every address in the profile parses.
    pub fn validate(&self) -> RunnerResult<()> {
        parse_mac(&self.wifi.mac)?;
        parse_mac(&self.wifi.soft_ap_mac)?;
        for neighbour in &self.wifi.neighbours {
            parse_mac(&neighbour.bssid)?;
        }
        Ok(())
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `aabbccddeeff`).
pub fn parse_mac(text: &str) -> RunnerResult<[u8; 6]> {
    let digits: String = text.chars().filter(|c| *c != ':' && *c != '-').collect();
    let bytes = hex::decode(&digits).map_err(|_| RunnerError::InvalidMac(text.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| RunnerError::InvalidMac(text.to_string()))
}
