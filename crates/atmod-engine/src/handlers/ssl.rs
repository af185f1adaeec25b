//! TLS configuration and certificate commands.

use atmod_cert::{Fingerprint, TlsAuthMode};
use atmod_protocol::{ParseCursor, MSG_OK};
use bytes::BufMut;
use tracing::{debug, info};

use super::{read_last_number, Invocation, Reply};
use crate::engine::Engine;
use crate::error::{CommandError, CommandResult};
use crate::platform::LinkKind;

/// Receive buffer sizes accepted by `AT+CIPSSLSIZE`.
const SSL_BUFFER_SIZES: [u32; 5] = [512, 1024, 2048, 4096, 16384];

/// Fragment lengths accepted by `AT+CIPSSLMFLN`.
const FRAGMENT_LENGTHS: [u32; 4] = [512, 1024, 2048, 4096];

/// `AT+CIPSSLSIZE=<size>`
pub(crate) fn buffer_size(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    let size = cursor.read_number()?;
    cursor.expect_line_end()?;
    if !SSL_BUFFER_SIZES.contains(&size) {
        return Err(CommandError::Syntax);
    }

    engine.links.set_ssl_buffer_size(size as usize);
    Ok(Reply::Ok)
}

/// `AT+CIPSSLAUTH`: 0 none, 1 fingerprint, 2 certificate chain.
pub(crate) fn auth(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine
            .out
            .put_slice(format!("+CIPSSLAUTH:{}\r\n", engine.trust.mode() as u8).as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let mode = TlsAuthMode::try_from(read_last_number(&mut cursor, 0, 2)?)
        .map_err(|_| CommandError::Syntax)?;
    engine
        .trust
        .set_mode(mode, &engine.certs)
        .map_err(|e| CommandError::precondition(e.to_string()))?;
    Ok(Reply::Ok)
}

/// `AT+CIPSSLFP`: show or pin the SHA-1 fingerprint.
pub(crate) fn fingerprint(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let Some(fingerprint) = engine.trust.fingerprint() else {
            return Err(CommandError::precondition("not valid"));
        };
        let text = format!("+CIPSSLFP:\"{}\"\r\n", fingerprint);
        engine.out.put_slice(text.as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let text = cursor.read_string(false, false)?;
    cursor.expect_line_end()?;
    let fingerprint = Fingerprint::parse(&text).map_err(|_| CommandError::Syntax)?;

    debug!(%fingerprint, "fingerprint pinned");
    engine.trust.set_fingerprint(fingerprint);
    Ok(Reply::Ok)
}

/// `AT+CIPSSLCERTMAX`
pub(crate) fn cert_max(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!("+CIPSSLCERTMAX:{}\r\nOK\r\n", engine.certs.capacity()).as_bytes(),
        );
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    let max = cursor.read_number()?;
    cursor.expect_line_end()?;

    engine
        .certs
        .set_capacity(max as usize)
        .map_err(|e| CommandError::precondition(e.to_string()))?;
    engine.persist(|s| s.max_certificates = max);
    info!(max, "certificate capacity changed");
    Ok(Reply::Ok)
}

fn write_cert_line(engine: &mut Engine, index: usize) {
    let name = engine.certs.describe(index).unwrap_or_default();
    engine
        .out
        .put_slice(format!("+CIPSSLCERT,{}:{}\r\n", index, name).as_bytes());
}

/// `AT+CIPSSLCERT`: load, list or delete trust certificates.
///
/// The bare form switches the serial line to certificate loading after the
/// `>` prompt. `?` lists every certificate, `?<n>` shows one and
/// `=DELETE,<n>` removes one.
pub(crate) fn cert(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_bare() {
        if engine.certs.is_full() {
            return Err(CommandError::Resource(format!(
                "Reached the maximum of {} certificates",
                engine.certs.capacity()
            )));
        }
        engine.out.put_slice(MSG_OK);
        engine.out.put_u8(b'>');
        engine.begin_cert_load();
        return Ok(Reply::Done);
    }

    if inv.is_query() {
        if engine.certs.is_empty() {
            engine.out.put_slice(b"+CIPSSLCERT:no certs loaded\r\n");
        }
        for index in 1..=engine.certs.len() {
            write_cert_line(engine, index);
        }
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.cursor();
    if cursor.eat(b'?') {
        return show_cert(engine, &mut cursor);
    }
    if cursor.eat_slice(b"=DELETE,") {
        return delete_cert(engine, &mut cursor);
    }
    Err(CommandError::Syntax)
}

fn show_cert(engine: &mut Engine, cursor: &mut ParseCursor<'_>) -> CommandResult<Reply> {
    let index = cursor.read_number()? as usize;
    cursor.expect_line_end()?;
    if index == 0 {
        return Err(CommandError::Syntax);
    }
    if index > engine.certs.len() {
        return Err(CommandError::precondition(format!(
            "+CIPSSLCERT,{}:no certificate",
            index
        )));
    }

    write_cert_line(engine, index);
    Ok(Reply::Ok)
}

fn delete_cert(engine: &mut Engine, cursor: &mut ParseCursor<'_>) -> CommandResult<Reply> {
    if engine.certs.is_empty() {
        return Err(CommandError::precondition("+CIPSSLCERT:no certificates"));
    }

    let index = cursor.read_number()? as usize;
    cursor.expect_line_end()?;
    if index == 0 {
        return Err(CommandError::Syntax);
    }
    if engine.certs.remove(index).is_none() {
        return Err(CommandError::precondition("+CIPSSLCERT=DELETE:no certificate"));
    }

    info!(index, remaining = engine.certs.len(), "certificate deleted");
    engine
        .out
        .put_slice(format!("+CIPSSLCERT,{}:deleted\r\n", index).as_bytes());
    Ok(Reply::Ok)
}

/// `AT+CIPSSLMFLN="<host>",<port>,<length>`: probe a server for max
/// fragment length support.
pub(crate) fn mfln(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    if cursor.peek() != Some(b'"') {
        return Err(CommandError::Syntax);
    }

    let host_error = || CommandError::precondition("HOSTNAME ERROR\r\n");
    let host = cursor.read_host().map_err(|_| host_error())?;
    if !cursor.eat(b',') {
        return Err(host_error());
    }

    let port = cursor.read_number_in(0, 65_535)? as u16;

    let size_error = || CommandError::precondition("SIZE ERROR\r\n");
    if !cursor.eat(b',') {
        return Err(size_error());
    }
    let len = cursor.read_number().map_err(|_| size_error())?;
    if !FRAGMENT_LENGTHS.contains(&len) {
        return Err(size_error());
    }
    cursor.expect_line_end()?;

    if !engine.platform.wifi.is_connected() {
        return Err(CommandError::precondition("NO AP"));
    }

    let supported = engine
        .platform
        .net
        .probe_max_fragment_length(&host, port, len as u16);
    debug!(%host, port, len, supported, "fragment length probe");
    let text = if supported { "TRUE" } else { "FALSE" };
    engine
        .out
        .put_slice(format!("+CIPSSLMFLN:{}\r\n", text).as_bytes());
    Ok(Reply::Ok)
}

/// `AT+CIPSSLSTA[=<id>]`: fragment length status of an SSL link.
pub(crate) fn status(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if !engine.platform.wifi.is_connected() {
        return Err(CommandError::precondition("NOT CONNECTED"));
    }

    let multiplexed = engine.links.multiplexed();
    let link = if inv.is_bare() {
        if multiplexed {
            return Err(CommandError::precondition("MUX=1"));
        }
        0
    } else {
        let mut cursor = inv.set_args()?;
        let id = read_last_number(&mut cursor, 0, 4)? as u8;
        if !multiplexed {
            return Err(CommandError::precondition("MUX=0"));
        }
        id
    };

    let slot = engine
        .links
        .get(link)
        .filter(|slot| slot.is_alive())
        .ok_or_else(|| CommandError::precondition("NOT OPENED"))?;
    if slot.kind() != LinkKind::Ssl {
        return Err(CommandError::precondition("NOT A SSL"));
    }

    let negotiated = slot.connection().is_some_and(|c| c.mfln_status());
    engine
        .out
        .put_slice(format!("+CIPSSLSTA:{}\r\n", u8::from(negotiated)).as_bytes());
    Ok(Reply::Ok)
}
