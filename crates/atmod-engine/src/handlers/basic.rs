//! Basic and device level commands.

use bytes::BufMut;
use tracing::{debug, info};

use super::{read_last_number, read_number_then_comma, Invocation, Reply};
use crate::engine::Engine;
use crate::error::{CommandError, CommandResult};
use crate::settings::{decode_frame, encode_frame};

/// `AT`
pub(crate) fn at(_engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    Ok(Reply::Ok)
}

/// `AT+RST`
pub(crate) fn restart(_engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    Ok(Reply::Restart)
}

/// `AT+RESTORE`: factory settings, then restart.
pub(crate) fn restore(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    info!("restoring factory settings");
    engine.reset_settings();
    Ok(Reply::Restart)
}

/// `AT+GMR`
pub(crate) fn version(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    let sdk = engine.platform.system.sdk_version();
    let text = format!(
        "AT version:1.7.0.0 (partial)\r\nSDK version:{}\r\nCompile time:{}\r\nVersion ESP_ATMod:{}\r\nOK\r\n",
        sdk, engine.config.build_time, engine.config.firmware_version
    );
    engine.out.put_slice(text.as_bytes());
    Ok(Reply::Done)
}

/// `ATE0` / `ATE1`
pub(crate) fn echo(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.cursor();
    engine.state.echo = read_last_number(&mut cursor, 0, 1)? == 1;
    Ok(Reply::Ok)
}

/// `AT+UART[_CUR|_DEF]`
pub(crate) fn uart(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let (baud, frame) = match inv.scope() {
            atmod_protocol::Scope::Default => {
                let stored = engine.settings.get();
                (stored.uart_baud, stored.uart_frame)
            }
            _ => (engine.state.uart_baud, engine.state.uart_frame),
        };
        let (data_bits, stop_bits, parity) = decode_frame(frame);
        engine.out.put_slice(
            format!(
                "+UART{}:{},{},{},{},0\r\nOK\r\n",
                inv.suffix(),
                baud,
                data_bits,
                stop_bits,
                parity
            )
            .as_bytes(),
        );
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    let baud = read_number_then_comma(&mut cursor, 110, 921_600)?;
    let data_bits = read_number_then_comma(&mut cursor, 5, 8)? as u8;
    let stop_bits = read_number_then_comma(&mut cursor, 1, 3)? as u8;
    let parity = read_number_then_comma(&mut cursor, 0, 2)? as u8;
    let flow = read_last_number(&mut cursor, 0, 3)?;

    if flow != 0 {
        return Err(CommandError::precondition("NOT IMPLEMENTED"));
    }

    let frame = encode_frame(data_bits, stop_bits, parity);
    debug!(baud, frame, "serial reconfigured");

    // The reply still goes out at the old speed.
    engine.out.put_slice(atmod_protocol::MSG_OK);
    engine.state.uart_baud = baud;
    engine.state.uart_frame = frame;
    engine.platform.system.reconfigure_uart(baud, frame);

    if inv.scope().persists() {
        engine.persist(|s| {
            s.uart_baud = baud;
            s.uart_frame = frame;
        });
    }
    Ok(Reply::Done)
}

/// `AT+SYSRAM?`
pub(crate) fn sysram(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    let free = engine.platform.system.free_heap();
    engine
        .out
        .put_slice(format!("+SYSRAM:{}\r\nOK\r\n", free).as_bytes());
    Ok(Reply::Done)
}

/// `AT+SYSCPUFREQ`
pub(crate) fn cpu_freq(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let mhz = engine.platform.system.cpu_freq_mhz();
        engine
            .out
            .put_slice(format!("+SYSCPUFREQ:{}\r\n", mhz).as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let mhz = read_last_number(&mut cursor, 80, 160)?;
    if mhz != 80 && mhz != 160 {
        return Err(CommandError::Syntax);
    }
    if !engine.platform.system.set_cpu_freq_mhz(mhz) {
        return Err(CommandError::Rejected);
    }
    Ok(Reply::Ok)
}

/// `AT+RFMODE`
pub(crate) fn rf_mode(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let mode = engine.platform.wifi.phy_mode();
        engine
            .out
            .put_slice(format!("+RFMODE:{}\r\nOK\r\n", mode).as_bytes());
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    let mode = read_last_number(&mut cursor, 1, 3)?;
    engine.platform.wifi.set_phy_mode(mode as u8);
    Ok(Reply::Ok)
}
