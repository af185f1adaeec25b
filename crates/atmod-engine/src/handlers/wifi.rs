//! WiFi and IP configuration commands.

use std::net::Ipv4Addr;

use atmod_protocol::{ParseCursor, Scope, MSG_OK};
use bytes::{BufMut, BytesMut};
use tracing::{debug, info, warn};

use super::{read_last_number, read_number_then_comma, Invocation, Reply};
use crate::engine::{Engine, PendingOperation};
use crate::error::{CommandError, CommandResult};
use crate::platform::{format_mac, IpConfig, JoinRequest, ScanResult, SoftApConfig, WifiMode};
use crate::state::ScanOptions;

/// Encryption types accepted for the soft AP; 1 (WEP) is refused.
const SOFT_AP_AUTH_MAX: u32 = 5;

fn reject_in(engine: &Engine, mode: WifiMode) -> CommandResult<()> {
    if engine.platform.wifi.mode() == mode {
        return Err(CommandError::Rejected);
    }
    Ok(())
}

/// `AT+CWMODE[_CUR|_DEF]`
pub(crate) fn mode(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let mode = engine.platform.wifi.mode();
        engine
            .out
            .put_slice(format!("+CWMODE{}:{}\r\n", inv.suffix(), mode.number()).as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let number = read_last_number(&mut cursor, 0, 3)?;
    let mode = WifiMode::from_number(number).ok_or(CommandError::Syntax)?;

    let applied = engine.platform.wifi.set_mode(mode, inv.scope().persists());
    info!(?mode, applied, "wifi mode");
    if applied {
        engine.out.put_slice(MSG_OK);
    } else {
        engine.out.put_slice(atmod_protocol::MSG_ERROR);
    }

    if mode != WifiMode::SoftAp {
        engine.apply_dns();
        engine.apply_dhcp();
    }
    if mode != WifiMode::Station {
        engine.apply_soft_ap_ip();
    }
    Ok(Reply::Done)
}

/// `AT+CWJAP[_CUR|_DEF]`: association completes on a later poll.
pub(crate) fn join(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    reject_in(engine, WifiMode::SoftAp)?;

    if inv.is_query() {
        let info = if engine.platform.wifi.is_connected() {
            engine
                .platform
                .wifi
                .station_info(inv.scope() == Scope::Default)
        } else {
            None
        };
        match info {
            Some(info) => engine.out.put_slice(
                format!(
                    "+CWJAP{}:\"{}\",\"{}\",{},{}\r\n",
                    inv.suffix(),
                    info.ssid,
                    format_mac(&info.bssid),
                    info.channel,
                    info.rssi
                )
                .as_bytes(),
            ),
            None => engine.out.put_slice(b"No AP\r\n"),
        }
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let ssid = cursor.read_string(true, false)?;
    cursor.expect(b',', "comma")?;
    let password = cursor.read_string(true, true)?;
    let bssid = if cursor.eat(b',') {
        Some(cursor.read_mac()?)
    } else {
        None
    };
    cursor.expect_line_end()?;

    if engine.platform.wifi.is_connected() {
        engine.platform.wifi.disconnect();
        if !engine.wait_disconnected() {
            warn!("still connected, join refused");
            return Err(CommandError::Rejected);
        }
    }

    let request = JoinRequest {
        ssid,
        password,
        bssid,
    };
    info!(ssid = %request.ssid, "joining");
    if !engine
        .platform
        .wifi
        .begin_join(&request, inv.scope().persists())
    {
        return Err(CommandError::Rejected);
    }
    engine.platform.wifi.set_auto_connect(true);

    engine.pending = Some(PendingOperation::Join {
        started: engine.now(),
    });
    Ok(Reply::Deferred)
}

/// `AT+CWLAPOPT=<sort>,<mask>[,<rssi>[,<authmask>]]`
pub(crate) fn scan_options(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        return Err(CommandError::Syntax);
    }

    let mut cursor = inv.set_args()?;
    let mut options = ScanOptions {
        sort_by_rssi: cursor.read_number_in(0, 1)? == 1,
        ..engine.state.scan
    };
    cursor.expect(b',', "comma")?;
    options.print_mask = cursor.read_number_in(0, 0x7ff)?;

    if cursor.eat(b',') {
        let negative = cursor.eat(b'-');
        let magnitude = cursor.read_number_in(0, 100)? as i32;
        options.rssi_filter = if negative { -magnitude } else { magnitude };

        if cursor.eat(b',') {
            options.auth_mask = cursor.read_number_in(0, 0xffff)?;
        }
    }
    cursor.expect_line_end()?;

    debug!(?options, "scan options");
    engine.state.scan = options;
    Ok(Reply::Ok)
}

/// `AT+CWLAP`: the list is printed when the scan completes.
pub(crate) fn scan(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    reject_in(engine, WifiMode::SoftAp)?;

    engine.platform.wifi.start_scan();
    engine.pending = Some(PendingOperation::Scan {
        started: engine.now(),
    });
    Ok(Reply::Deferred)
}

fn scan_visible(result: &ScanResult, options: &ScanOptions) -> bool {
    let listed = result.encryption > 8
        || options.auth_mask & (1u32 << result.encryption) != 0;
    listed && result.rssi > options.rssi_filter
}

/// Write `+CWLAP:` lines for the results that pass `options`.
pub(crate) fn render_scan(results: &[ScanResult], options: &ScanOptions, out: &mut BytesMut) {
    let mut shown: Vec<&ScanResult> = results
        .iter()
        .filter(|r| scan_visible(r, options))
        .collect();
    if options.sort_by_rssi {
        shown.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    }

    for result in shown {
        let mut fields: Vec<String> = Vec::new();
        let bssid = format_mac(&result.bssid).to_uppercase();
        let values = [
            result.encryption.to_string(),
            result.ssid.clone(),
            result.rssi.to_string(),
            bssid,
            result.channel.to_string(),
        ];
        for (bit, value) in values.into_iter().enumerate() {
            if options.print_mask & (1 << bit) != 0 {
                fields.push(value);
            }
        }
        // Frequency offset, calibration, ciphers, bgn and WPS are not known.
        for bit in 5..=10 {
            if options.print_mask & (1 << bit) != 0 {
                fields.push("0".to_string());
            }
        }
        out.put_slice(format!("+CWLAP:({})\n", fields.join(",")).as_bytes());
    }
}

/// `AT+CWQAP`
pub(crate) fn quit(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    if engine.platform.wifi.is_connected() {
        info!("leaving access point");
        engine.platform.wifi.disconnect();
    }
    Ok(Reply::Ok)
}

/// `AT+CWSAP[_CUR|_DEF]`
pub(crate) fn soft_ap(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    reject_in(engine, WifiMode::Station)?;

    if inv.is_query() {
        let config = engine
            .platform
            .wifi
            .soft_ap_config(inv.scope() != Scope::Current);
        engine.out.put_slice(
            format!(
                "+CWSAP{}:\"{}\",\"{}\",{},{},{},{}\r\n",
                inv.suffix(),
                config.ssid,
                config.password,
                config.channel,
                config.encryption,
                config.max_connections,
                u8::from(config.hidden)
            )
            .as_bytes(),
        );
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let ssid = cursor.read_string(true, false)?;
    cursor.expect(b',', "comma")?;
    let password = cursor.read_string(true, true)?;
    cursor.expect(b',', "comma")?;
    let channel = read_number_then_comma(&mut cursor, 0, 14)? as u8;
    let encryption = cursor.read_number_in(0, SOFT_AP_AUTH_MAX - 1)?;
    if encryption == 1 {
        return Err(CommandError::Syntax);
    }

    let mut max_connections = 4;
    let mut hidden = false;
    if cursor.eat(b',') {
        max_connections = cursor.read_number_in(0, 4)? as u8;
        if cursor.eat(b',') {
            hidden = cursor.read_number_in(0, 1)? == 1;
        }
    }
    cursor.expect_line_end()?;

    let config = SoftApConfig {
        ssid,
        password,
        channel,
        encryption: encryption as u8,
        max_connections,
        hidden,
    };
    if !engine
        .platform
        .wifi
        .set_soft_ap(&config, inv.scope().persists())
    {
        return Err(CommandError::Rejected);
    }
    info!(ssid = %config.ssid, channel, "soft AP configured");
    Ok(Reply::Ok)
}

/// `AT+CWDHCP[_CUR|_DEF]`: only station DHCP can be switched.
pub(crate) fn dhcp(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let mode = match inv.scope() {
            Scope::Default => engine.settings.get().dhcp_mode,
            _ => engine.state.dhcp_mode,
        };
        engine
            .out
            .put_slice(format!("+CWDHCP{}:{}\r\n", inv.suffix(), mode).as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let target = read_number_then_comma(&mut cursor, 0, 2)?;
    let target_mode = match target {
        0 => WifiMode::SoftAp,
        1 => WifiMode::Station,
        _ => WifiMode::StationSoftAp,
    };
    if target_mode != engine.platform.wifi.mode() {
        return Err(CommandError::Rejected);
    }
    let enable = read_last_number(&mut cursor, 0, 1)? as u8;

    let mode = 1 | enable << 1;
    engine.state.dhcp_mode = mode;
    engine.apply_dhcp();
    if inv.scope().persists() {
        engine.persist(|s| s.dhcp_mode = mode);
    }
    Ok(Reply::Ok)
}

/// `AT+CWAUTOCONN`
pub(crate) fn auto_connect(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let enabled = engine.platform.wifi.auto_connect();
        engine
            .out
            .put_slice(format!("+CWAUTOCONN:{}\r\n", u8::from(enabled)).as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let enabled = read_last_number(&mut cursor, 0, 1)? == 1;
    engine.platform.wifi.set_auto_connect(enabled);
    Ok(Reply::Ok)
}

fn mac_command(engine: &mut Engine, inv: &Invocation, name: &str, mac: [u8; 6]) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!(
                "+{}{}:\"{}\"\r\n",
                name,
                inv.suffix(),
                format_mac(&mac).to_uppercase()
            )
            .as_bytes(),
        );
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    cursor.read_mac()?;
    cursor.expect_line_end()?;
    Err(CommandError::precondition("NOT IMPLEMENTED"))
}

/// `AT+CIPSTAMAC[_CUR|_DEF]`: query only.
pub(crate) fn station_mac(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mac = engine.platform.wifi.station_mac();
    mac_command(engine, inv, "CIPSTAMAC", mac)
}

/// `AT+CIPAPMAC[_CUR|_DEF]`: query only.
pub(crate) fn soft_ap_mac(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mac = engine.platform.wifi.soft_ap_mac();
    mac_command(engine, inv, "CIPAPMAC", mac)
}

fn write_ip_config(out: &mut BytesMut, name: &str, suffix: &str, config: &IpConfig) {
    let config = if config.ip.is_unspecified() {
        IpConfig::UNSET
    } else {
        *config
    };
    for (field, addr) in [
        ("ip", config.ip),
        ("gateway", config.gateway),
        ("netmask", config.netmask),
    ] {
        out.put_slice(format!("+{}{}:{}:\"{}\"\r\n", name, suffix, field, addr).as_bytes());
    }
}

/// Parse `"<ip>"[,"<gateway>","<netmask>"]`.
fn read_ip_config(cursor: &mut ParseCursor<'_>) -> CommandResult<IpConfig> {
    let ip = cursor.read_ipv4()?;
    let config = if cursor.eat(b',') {
        let gateway = cursor.read_ipv4()?;
        cursor.expect(b',', "comma")?;
        let netmask = cursor.read_ipv4()?;
        IpConfig {
            ip,
            gateway,
            netmask,
        }
    } else {
        IpConfig::with_derived_gateway(ip)
    };
    cursor.expect_line_end()?;
    Ok(config)
}

/// `AT+CIPSTA[_CUR|_DEF]`: a static address switches station DHCP off.
pub(crate) fn station_ip(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    reject_in(engine, WifiMode::SoftAp)?;

    if inv.is_query() {
        let config = match inv.scope() {
            Scope::Default => engine.settings.get().station,
            _ => engine.platform.wifi.station_ip(),
        };
        let config = if engine.platform.wifi.is_connected() {
            config
        } else {
            IpConfig::UNSET
        };
        write_ip_config(&mut engine.out, "CIPSTA", inv.suffix(), &config);
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let config = read_ip_config(&mut cursor)?;

    if inv.scope().persists() {
        engine.persist(|s| {
            s.station = config;
            s.dhcp_mode = 1;
        });
    }
    engine.state.station_ip = config;
    engine.state.dhcp_mode = 1;
    engine.apply_dhcp();
    info!(ip = %config.ip, "static station address");
    Ok(Reply::Ok)
}

/// `AT+CIPAP[_CUR|_DEF]`
pub(crate) fn soft_ap_ip(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    reject_in(engine, WifiMode::Station)?;

    if inv.is_query() {
        let config = match inv.scope() {
            Scope::Default => engine.settings.get().soft_ap,
            _ => engine.platform.wifi.soft_ap_ip(),
        };
        write_ip_config(&mut engine.out, "CIPAP", inv.suffix(), &config);
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let config = read_ip_config(&mut cursor)?;

    if inv.scope().persists() {
        engine.persist(|s| s.soft_ap = config);
    }
    engine.state.soft_ap_ip = config;
    engine.apply_soft_ap_ip();
    Ok(Reply::Ok)
}

/// `AT+CWHOSTNAME`
pub(crate) fn hostname(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let name = engine.platform.wifi.hostname();
        engine
            .out
            .put_slice(format!("+CWHOSTNAME:{}\r\n", name).as_bytes());
        return Ok(Reply::Ok);
    }

    reject_in(engine, WifiMode::SoftAp)?;
    let mut cursor = inv.set_args()?;
    let name = cursor.read_string(false, false)?;
    cursor.expect_line_end()?;

    if !engine.platform.wifi.set_hostname(&name) || engine.platform.wifi.hostname() != name {
        return Err(CommandError::Rejected);
    }
    Ok(Reply::Ok)
}

/// `AT+CIPDNS[_CUR|_DEF]`
pub(crate) fn dns(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let [dns1, dns2] = match inv.scope() {
            Scope::Default => engine.settings.get().dns,
            _ => engine.platform.wifi.dns_servers(),
        };
        if !dns1.is_unspecified() {
            engine
                .out
                .put_slice(format!("+CIPDNS{}:{}\r\n", inv.suffix(), dns1).as_bytes());
            if !dns2.is_unspecified() && dns2 != dns1 {
                engine
                    .out
                    .put_slice(format!("+CIPDNS{}:{}\r\n", inv.suffix(), dns2).as_bytes());
            }
        }
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let enable = cursor.read_number_in(0, 1)?;
    let mut servers = [Ipv4Addr::UNSPECIFIED; 2];

    if enable == 1 {
        cursor.expect(b',', "comma")?;
        servers[0] = cursor.read_ipv4()?;
        if servers[0].is_unspecified() {
            return Err(CommandError::precondition("IP1 invalid"));
        }
        if cursor.eat(b',') {
            servers[1] = cursor.read_ipv4()?;
            cursor.expect_line_end()?;
            if servers[1].is_unspecified() {
                return Err(CommandError::precondition("IP2 invalid"));
            }
        }
    }
    cursor.expect_line_end()?;

    if inv.scope().persists() {
        engine.persist(|s| s.dns = servers);
    }
    engine.state.dns = servers;
    engine.apply_dns();
    Ok(Reply::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::mock::{mock_platform, MockHandles};
    use crate::platform::{JoinStatus, WifiEvent};
    use crate::state::EngineConfig;

    fn engine() -> (Engine, MockHandles) {
        let (platform, handles) = mock_platform();
        let config = EngineConfig {
            echo: false,
            ..EngineConfig::default()
        };
        (Engine::new(platform, config), handles)
    }

    fn run(engine: &mut Engine, line: &str) -> String {
        engine.feed(line.as_bytes());
        String::from_utf8_lossy(&engine.take_output()).into_owned()
    }

    fn poll(engine: &mut Engine) -> String {
        engine.poll();
        String::from_utf8_lossy(&engine.take_output()).into_owned()
    }

    fn network(ssid: &str, rssi: i32, encryption: u8) -> ScanResult {
        ScanResult {
            encryption,
            ssid: ssid.to_string(),
            rssi,
            bssid: [0xaa, 0xbb, 0xcc, 0, 0, 1],
            channel: 11,
        }
    }

    #[test]
    fn test_mode_query_and_set() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CWMODE_CUR?\r\n"), "+CWMODE_CUR:1\r\n\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWMODE=3\r\n"), "\r\nOK\r\n");
        assert_eq!(handles.wifi.borrow().mode, WifiMode::StationSoftAp);
        assert_eq!(
            handles.wifi.borrow().soft_ap_ip.ip,
            Ipv4Addr::new(192, 168, 4, 1)
        );
        assert_eq!(run(&mut engine, "AT+CWMODE=4\r\n"), "\r\nERROR\r\n");
    }

    #[test]
    fn test_join_deferred_until_connected() {
        let (mut engine, handles) = engine();
        handles.wifi.borrow_mut().join_script =
            [JoinStatus::InProgress, JoinStatus::Connected].into_iter().collect();

        assert_eq!(run(&mut engine, "AT+CWJAP_CUR=\"home\",\"secret\"\r\n"), "");
        assert!(engine.pending().is_some());
        assert_eq!(run(&mut engine, "AT\r\n"), "busy p...\r\n");

        assert_eq!(poll(&mut engine), "");
        handles.wifi.borrow_mut().events.push_back(WifiEvent::Connected);
        assert_eq!(poll(&mut engine), "WIFI CONNECTED\r\n\r\nOK\r\n");
        assert!(engine.pending().is_none());

        let (request, persistent) = handles.wifi.borrow().last_join.clone().expect("join");
        assert_eq!(request.ssid, "home");
        assert!(!persistent);

        assert_eq!(
            run(&mut engine, "AT+CWJAP?\r\n"),
            "+CWJAP:\"home\",\"10:20:30:40:50:60\",6,-55\r\n\r\nOK\r\n"
        );
    }

    #[test]
    fn test_join_failure_and_timeout() {
        let (mut engine, handles) = engine();
        handles.wifi.borrow_mut().join_script = [JoinStatus::Failed(2)].into_iter().collect();
        run(&mut engine, "AT+CWJAP=\"home\",\"bad\"\r\n");
        assert_eq!(poll(&mut engine), "+CWJAP:2\r\n\r\nFAIL\r\n");

        handles.wifi.borrow_mut().join_script = [JoinStatus::InProgress].into_iter().collect();
        run(&mut engine, "AT+CWJAP=\"home\",\"slow\"\r\n");
        handles.clock.borrow_mut().advance(20_001);
        assert_eq!(poll(&mut engine), "+CWJAP:1\r\n\r\nFAIL\r\n");
    }

    #[test]
    fn test_join_refused_in_soft_ap_mode() {
        let (mut engine, handles) = engine();
        handles.wifi.borrow_mut().mode = WifiMode::SoftAp;
        assert_eq!(run(&mut engine, "AT+CWJAP?\r\n"), "\r\nERROR\r\n");
        assert_eq!(run(&mut engine, "AT+CWJAP=\"\",\"x\"\r\n"), "\r\nERROR\r\n");
    }

    #[test]
    fn test_join_query_without_association() {
        let (mut engine, _) = engine();
        assert_eq!(run(&mut engine, "AT+CWJAP?\r\n"), "No AP\r\n\r\nOK\r\n");
    }

    #[test]
    fn test_scan_filtered_and_sorted() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CWLAPOPT=1,31,-80\r\n"), "\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWLAP\r\n"), "");

        handles.wifi.borrow_mut().scan_results = Some(vec![
            network("weak", -90, 3),
            network("near", -40, 3),
            network("mid", -60, 0),
        ]);
        assert_eq!(
            poll(&mut engine),
            "+CWLAP:(3,near,-40,AA:BB:CC:00:00:01,11)\n+CWLAP:(0,mid,-60,AA:BB:CC:00:00:01,11)\n\r\nOK\r\n"
        );
    }

    #[test]
    fn test_scan_mask_and_auth_filter() {
        let mut out = BytesMut::new();
        let options = ScanOptions {
            print_mask: 0b10_0000_0110,
            auth_mask: 1 << 4,
            ..ScanOptions::default()
        };
        render_scan(&[network("open", -50, 0), network("wpa2", -50, 4)], &options, &mut out);
        assert_eq!(&out[..], b"+CWLAP:(wpa2,-50,0)\n");
    }

    #[test]
    fn test_scan_timeout() {
        let (mut engine, handles) = engine();
        run(&mut engine, "AT+CWLAP\r\n");
        handles.clock.borrow_mut().advance(15_001);
        assert_eq!(poll(&mut engine), "\r\nERROR\r\n");
    }

    #[test]
    fn test_soft_ap_config() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CWSAP?\r\n"), "\r\nERROR\r\n");

        handles.wifi.borrow_mut().mode = WifiMode::SoftAp;
        assert_eq!(run(&mut engine, "AT+CWSAP_CUR=\"lab\",\"pass1234\",6,3,2\r\n"), "\r\nOK\r\n");
        assert_eq!(
            run(&mut engine, "AT+CWSAP_CUR?\r\n"),
            "+CWSAP_CUR:\"lab\",\"pass1234\",6,3,2,0\r\n\r\nOK\r\n"
        );
        assert_eq!(
            run(&mut engine, "AT+CWSAP_DEF?\r\n"),
            "+CWSAP_DEF:\"ESP_ATMOD\",\"\",1,0,4,0\r\n\r\nOK\r\n"
        );
        assert_eq!(run(&mut engine, "AT+CWSAP=\"lab\",\"pass\",6,1\r\n"), "\r\nERROR\r\n");
    }

    #[test]
    fn test_dhcp_mode() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CWDHCP_CUR=1,0\r\n"), "\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWDHCP?\r\n"), "+CWDHCP:1\r\n\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWDHCP_DEF?\r\n"), "+CWDHCP_DEF:3\r\n\r\nOK\r\n");
        assert!(handles.wifi.borrow().static_ip.is_some());

        // Mode must match the running WiFi mode.
        assert_eq!(run(&mut engine, "AT+CWDHCP=0,1\r\n"), "\r\nERROR\r\n");
    }

    #[test]
    fn test_station_ip() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CIPSTA_DEF=\"10.0.0.7\"\r\n"), "\r\nOK\r\n");
        assert_eq!(engine.settings().dhcp_mode, 1);
        assert_eq!(
            engine.settings().station.gateway,
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert_eq!(
            handles.wifi.borrow().static_ip.map(|c| c.ip),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );

        // Not associated: all zeros.
        assert_eq!(
            run(&mut engine, "AT+CIPSTA?\r\n"),
            "+CIPSTA:ip:\"0.0.0.0\"\r\n+CIPSTA:gateway:\"0.0.0.0\"\r\n+CIPSTA:netmask:\"0.0.0.0\"\r\n\r\nOK\r\n"
        );

        handles.wifi.borrow_mut().connected = true;
        assert_eq!(
            run(&mut engine, "AT+CIPSTA_CUR?\r\n"),
            "+CIPSTA_CUR:ip:\"10.0.0.7\"\r\n+CIPSTA_CUR:gateway:\"10.0.0.1\"\r\n+CIPSTA_CUR:netmask:\"255.255.255.0\"\r\n\r\nOK\r\n"
        );
    }

    #[test]
    fn test_soft_ap_ip() {
        let (mut engine, handles) = engine();
        handles.wifi.borrow_mut().mode = WifiMode::SoftAp;
        assert_eq!(
            run(&mut engine, "AT+CIPAP_CUR=\"192.168.9.1\",\"192.168.9.1\",\"255.255.255.0\"\r\n"),
            "\r\nOK\r\n"
        );
        assert_eq!(handles.storage.borrow().writes, 0);
        assert_eq!(
            run(&mut engine, "AT+CIPAP?\r\n"),
            "+CIPAP:ip:\"192.168.9.1\"\r\n+CIPAP:gateway:\"192.168.9.1\"\r\n+CIPAP:netmask:\"255.255.255.0\"\r\n\r\nOK\r\n"
        );
    }

    #[test]
    fn test_mac_queries() {
        let (mut engine, _) = engine();
        assert_eq!(
            run(&mut engine, "AT+CIPSTAMAC?\r\n"),
            "+CIPSTAMAC:\"5C:CF:7F:01:02:03\"\r\n\r\nOK\r\n"
        );
        assert_eq!(
            run(&mut engine, "AT+CIPAPMAC_CUR=\"11:22:33:44:55:66\"\r\n"),
            "NOT IMPLEMENTED\r\n\r\nERROR\r\n"
        );
    }

    #[test]
    fn test_hostname() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CWHOSTNAME=\"probe\"\r\n"), "\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWHOSTNAME?\r\n"), "+CWHOSTNAME:probe\r\n\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWHOSTNAME=\"\"\r\n"), "\r\nERROR\r\n");

        handles.wifi.borrow_mut().mode = WifiMode::SoftAp;
        assert_eq!(run(&mut engine, "AT+CWHOSTNAME=\"x\"\r\n"), "\r\nERROR\r\n");
    }

    #[test]
    fn test_dns() {
        let (mut engine, handles) = engine();
        assert_eq!(run(&mut engine, "AT+CIPDNS_CUR=1,\"0.0.0.0\"\r\n"), "IP1 invalid\r\n\r\nERROR\r\n");
        assert_eq!(
            run(&mut engine, "AT+CIPDNS_CUR=1,\"1.1.1.1\",\"8.8.8.8\"\r\n"),
            "\r\nOK\r\n"
        );
        assert_eq!(
            run(&mut engine, "AT+CIPDNS_CUR?\r\n"),
            "+CIPDNS_CUR:1.1.1.1\r\n+CIPDNS_CUR:8.8.8.8\r\n\r\nOK\r\n"
        );
        assert_eq!(run(&mut engine, "AT+CIPDNS_DEF?\r\n"), "\r\nOK\r\n");
        assert_eq!(handles.storage.borrow().writes, 0);
    }

    #[test]
    fn test_quit_and_auto_connect() {
        let (mut engine, handles) = engine();
        handles.wifi.borrow_mut().associate("home", Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(run(&mut engine, "AT+CWQAP\r\n"), "\r\nOK\r\n");
        assert!(!handles.wifi.borrow().connected);

        assert_eq!(run(&mut engine, "AT+CWAUTOCONN=0\r\n"), "\r\nOK\r\n");
        assert_eq!(run(&mut engine, "AT+CWAUTOCONN?\r\n"), "+CWAUTOCONN:0\r\n\r\nOK\r\n");
    }
}
