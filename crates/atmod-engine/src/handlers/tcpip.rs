//! Link and server commands.

use atmod_protocol::{ParseCursor, MSG_OK, MSG_SEND_PROMPT};
use bytes::BufMut;
use tracing::{debug, info, warn};

use super::{read_last_number, Invocation, Reply};
use crate::connections::{MAX_IPD_CHUNK, MAX_LINKS};
use crate::engine::{Engine, PendingOperation};
use crate::error::{CommandError, CommandResult, LinkError, NetError};
use crate::platform::{format_mac, ConnectRequest, LinkKind, TlsParams};

/// Link id meaning "every link" in `AT+CIPCLOSE`.
const ALL_LINKS: u32 = 5;

/// Read a `<digit>,` link id prefix if present.
///
/// Digits up to `max` are taken as an id; without multiplexing that is
/// answered with `MUX=0`.
fn read_link_prefix(cursor: &mut ParseCursor<'_>, max: u8, multiplexed: bool) -> CommandResult<Option<u8>> {
    match (cursor.peek(), cursor.peek_at(1)) {
        (Some(d @ b'0'..=b'9'), Some(b',')) if d - b'0' <= max => {
            if !multiplexed {
                return Err(CommandError::precondition("MUX=0"));
            }
            cursor.advance(2);
            Ok(Some(d - b'0'))
        }
        _ => Ok(None),
    }
}

/// `AT+CIPSTATUS`
pub(crate) fn status(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    if !engine.platform.wifi.is_connected() {
        engine.out.put_slice(b"STATUS:5\r\n\r\nOK\r\n");
        return Ok(Reply::Done);
    }

    let multiplexed = engine.links.multiplexed();
    let mut lines = Vec::new();
    for (id, slot) in engine.links.links() {
        if !multiplexed && id > 0 {
            break;
        }
        let Some(connection) = slot.connection().filter(|c| c.connected()) else {
            continue;
        };
        let remote = connection.remote_addr();
        lines.push(format!(
            "+CIPSTATUS:{},\"{}\",\"{}\",{},{},0\r\n",
            id,
            slot.kind(),
            remote.ip(),
            remote.port(),
            connection.local_port()
        ));
    }

    if lines.is_empty() {
        let code = if engine.state.was_connected { 4 } else { 2 };
        engine
            .out
            .put_slice(format!("STATUS:{}\r\n", code).as_bytes());
    } else {
        engine.out.put_slice(b"STATUS:3\r\n");
        for line in lines {
            engine.out.put_slice(line.as_bytes());
        }
    }
    Ok(Reply::Ok)
}

/// `AT+CIPDOMAIN="<host>"`: the address is printed when the lookup ends.
pub(crate) fn domain(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    let host = cursor.read_host()?;
    cursor.expect_line_end()?;
    if host.is_empty() {
        return Err(CommandError::Syntax);
    }

    debug!(%host, "resolving");
    engine.platform.net.start_resolve(&host);
    engine.pending = Some(PendingOperation::Resolve {
        started: engine.now(),
    });
    Ok(Reply::Deferred)
}

struct StartArgs {
    link: u8,
    kind: LinkKind,
    host: String,
    port: u16,
}

fn parse_start(cursor: &mut ParseCursor<'_>, multiplexed: bool) -> CommandResult<StartArgs> {
    let link = if multiplexed {
        match (cursor.peek(), cursor.peek_at(1)) {
            (Some(d @ b'0'..=b'4'), Some(b',')) => {
                cursor.advance(2);
                d - b'0'
            }
            _ => return Err(CommandError::Syntax),
        }
    } else {
        0
    };

    let kind = if cursor.eat_slice(b"\"TCP") {
        LinkKind::Tcp
    } else if cursor.eat_slice(b"\"UDP") {
        LinkKind::Udp
    } else if cursor.eat_slice(b"\"SSL") {
        LinkKind::Ssl
    } else {
        return Err(CommandError::precondition("Link type ERROR\r\n"));
    };

    let ip_error = || CommandError::precondition("IP ERROR\r\n");
    if !cursor.eat_slice(b"\",") {
        return Err(ip_error());
    }
    let host = cursor.read_host().map_err(|_| ip_error())?;
    if !cursor.eat(b',') {
        return Err(ip_error());
    }

    let port = cursor.read_number_in(0, 65_535)? as u16;
    // TCP keep-alive is accepted and ignored.
    if cursor.eat(b',') {
        while cursor.peek().is_some_and(|c| c.is_ascii_digit()) {
            cursor.advance(1);
        }
    }
    cursor.expect_line_end()?;

    Ok(StartArgs {
        link,
        kind,
        host,
        port,
    })
}

/// `AT+CIPSTART=[<id>,]"<type>","<host>",<port>[,<keepalive>]`
pub(crate) fn start(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    let args = parse_start(&mut cursor, engine.links.multiplexed())?;

    if !(engine.platform.wifi.is_connected() || engine.platform.wifi.mode().has_soft_ap()) {
        return Err(CommandError::precondition("no ip"));
    }
    if engine.links.get(args.link).is_some() {
        return Err(CommandError::precondition("ALREADY CONNECTED\r\n"));
    }
    if args.kind == LinkKind::Udp {
        debug!("UDP links are not supported");
        return Err(CommandError::Rejected);
    }

    let credentials = if args.kind == LinkKind::Ssl {
        match engine.trust.credentials(&engine.certs) {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                debug!("no TLS credentials: {}", e);
                return Err(CommandError::Rejected);
            }
        }
    } else {
        None
    };

    let link = match engine.links.allocate_at(args.link, args.kind) {
        Ok(link) => link,
        Err(e @ LinkError::TlsBudget { .. }) => {
            warn!("{}", e);
            return Err(CommandError::Resource("not enough memory".to_string()));
        }
        Err(e) => {
            debug!("{}", e);
            return Err(CommandError::Rejected);
        }
    };

    let request = ConnectRequest {
        kind: args.kind,
        host: &args.host,
        port: args.port,
        tls: credentials.map(|credentials| TlsParams {
            credentials,
            buffer_size: engine.links.ssl_buffer_size(),
        }),
    };
    let connection = match engine.platform.net.connect(&request) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(link, host = %args.host, port = args.port, "connect failed: {}", e);
            engine.links.release(link);
            let message = match e {
                NetError::Dns(_) => "DNS Fail",
                _ => "connect fail",
            };
            return Err(CommandError::Io(message.to_string()));
        }
    };

    let now = engine.now();
    engine.links.attach(link, connection, false, now).map_err(|e| {
        warn!(link, "attach failed: {}", e);
        CommandError::Rejected
    })?;
    engine.state.was_connected = true;
    info!(link, kind = %args.kind, host = %args.host, port = args.port, "link connected");

    if engine.links.multiplexed() {
        engine
            .out
            .put_slice(format!("{},CONNECT\r\n\r\nOK\r\n", link).as_bytes());
    } else {
        engine.out.put_slice(b"CONNECT\r\n\r\nOK\r\n");
    }
    Ok(Reply::Done)
}

/// `AT+CIPSEND=[<id>,]<len>`: the payload follows the `>` prompt.
pub(crate) fn send(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    let link = read_link_prefix(&mut cursor, 5, engine.links.multiplexed())?.unwrap_or(0);

    if link as usize >= MAX_LINKS || !engine.links.is_alive(link) {
        return Err(CommandError::precondition("link is not valid"));
    }

    let len = cursor.read_number()? as usize;
    cursor.expect_line_end()?;
    if len == 0 {
        return Err(CommandError::Syntax);
    }
    if len > engine.config.max_send_length {
        return Err(CommandError::precondition("too long"));
    }

    engine.links.arm_send(link, len).map_err(|e| {
        debug!("{}", e);
        CommandError::precondition("link is not valid")
    })?;
    engine.out.put_slice(MSG_SEND_PROMPT);
    engine.begin_send(link, len);
    Ok(Reply::Done)
}

/// `AT+CIPCLOSEMODE`: parsed and ignored.
pub(crate) fn close_mode(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    if engine.links.multiplexed() {
        cursor.read_number_in(0, 4)?;
        cursor.expect(b',', "comma")?;
    }
    read_last_number(&mut cursor, 0, 1)?;
    Ok(Reply::Ok)
}

/// `AT+CIPCLOSE[=<id>]`
pub(crate) fn close(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let multiplexed = engine.links.multiplexed();

    let target = if inv.is_bare() {
        if multiplexed {
            return Err(CommandError::precondition("MUX=1"));
        }
        0
    } else {
        let mut cursor = inv.set_args()?;
        let id = read_last_number(&mut cursor, 0, ALL_LINKS)?;
        if !multiplexed {
            return Err(CommandError::precondition("MUX=0"));
        }
        id
    };

    let ids: Vec<u8> = if target == ALL_LINKS {
        (0..MAX_LINKS as u8).collect()
    } else {
        vec![target as u8]
    };

    for id in ids {
        if engine.links.release(id) {
            if multiplexed {
                engine
                    .out
                    .put_slice(format!("{},CLOSED\r\n", id).as_bytes());
            } else {
                engine.out.put_slice(b"CLOSED\r\n");
            }
        } else if target != ALL_LINKS {
            if multiplexed {
                engine.out.put_slice(b"UNLINK\r\n");
            }
            return Err(CommandError::Rejected);
        }
    }
    Ok(Reply::Ok)
}

/// `AT+CIFSR`
pub(crate) fn local_address(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    let ip = engine.platform.wifi.station_ip().ip;
    let mac = engine.platform.wifi.station_mac();
    engine.out.put_slice(
        format!(
            "+CIFSR:STAIP,\"{}\"\r\n+CIFSR:STAMAC,\"{}\"\r\n",
            ip,
            format_mac(&mac).to_uppercase()
        )
        .as_bytes(),
    );
    Ok(Reply::Ok)
}

/// `AT+CIPMUX`
pub(crate) fn mux(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!("+CIPMUX:{}\r\n\r\nOK\r\n", u8::from(engine.links.multiplexed())).as_bytes(),
        );
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    let enabled = read_last_number(&mut cursor, 0, 1)? == 1;

    if engine.links.any_occupied() {
        return Err(CommandError::precondition("link is builded"));
    }
    if engine.links.any_server() {
        return Err(CommandError::precondition("CIPSERVER must be 0"));
    }
    engine.links.set_multiplexed(enabled);
    Ok(Reply::Ok)
}

/// `AT+CIPDINFO`
pub(crate) fn show_remote(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let text = if engine.state.show_remote { "TRUE" } else { "FALSE" };
        engine
            .out
            .put_slice(format!("+CIPDINFO:{}\r\n\r\nOK\r\n", text).as_bytes());
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    engine.state.show_remote = read_last_number(&mut cursor, 0, 1)? == 1;
    Ok(Reply::Ok)
}

/// `AT+CIPSERVER=<0|1>[,<port>]`
pub(crate) fn server(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if !engine.links.multiplexed() {
        return Err(CommandError::Rejected);
    }

    let mut cursor = inv.set_args()?;
    let start = cursor.read_number_in(0, 1)? == 1;
    let port = if cursor.eat(b',') {
        Some(cursor.read_number_in(0, 65_535)? as u16)
    } else {
        None
    };
    cursor.expect_line_end()?;

    if !start {
        // Port 0 closes whichever server runs first.
        let port = port.filter(|p| *p != 0);
        if !engine.links.stop_server(port) {
            return Err(CommandError::precondition("no change"));
        }
        return Ok(Reply::Ok);
    }

    let port = port.unwrap_or(engine.config.default_server_port);
    if engine.links.server_running(port) {
        return Err(CommandError::precondition("no change"));
    }
    engine
        .links
        .start_server(engine.platform.net.as_mut(), port)
        .map_err(|e| {
            warn!(port, "server not started: {}", e);
            CommandError::Rejected
        })?;
    Ok(Reply::Ok)
}

/// `AT+CIPSERVERMAXCONN`
pub(crate) fn server_max_connections(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!("+CIPSERVERMAXCONN:{}\r\n", engine.state.max_server_connections).as_bytes(),
        );
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    engine.state.max_server_connections = read_last_number(&mut cursor, 1, MAX_LINKS as u32)? as u8;
    Ok(Reply::Ok)
}

/// `AT+CIPSTO`: idle timeout of server links in seconds.
pub(crate) fn server_timeout(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!("+CIPSTO:{}\r\n", engine.state.server_timeout_ms / 1000).as_bytes(),
        );
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let secs = read_last_number(&mut cursor, 0, 7200)?;
    engine.state.server_timeout_ms = u64::from(secs) * 1000;
    Ok(Reply::Ok)
}

/// `AT+CIPRECVMODE`
pub(crate) fn recv_mode(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        engine.out.put_slice(
            format!("+CIPRECVMODE:{}\r\n\r\nOK\r\n", u8::from(engine.state.passive_recv)).as_bytes(),
        );
        return Ok(Reply::Done);
    }

    let mut cursor = inv.set_args()?;
    engine.state.passive_recv = read_last_number(&mut cursor, 0, 1)? == 1;
    Ok(Reply::Ok)
}

/// `AT+CIPRECVDATA=[<id>,]<len>`: read buffered bytes in passive mode.
pub(crate) fn recv_data(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    let mut cursor = inv.set_args()?;
    let link = read_link_prefix(&mut cursor, 5, engine.links.multiplexed())?.unwrap_or(0);

    if link as usize >= MAX_LINKS || engine.links.get(link).is_none() {
        return Err(CommandError::precondition("link is not valid"));
    }

    let len = cursor.read_number()? as usize;
    cursor.expect_line_end()?;
    if len > MAX_IPD_CHUNK {
        return Err(CommandError::precondition("too long"));
    }

    let now = engine.now();
    let data = engine.links.read(link, len, now).map_err(|e| {
        debug!("{}", e);
        CommandError::Rejected
    })?;
    if data.is_empty() {
        return Err(CommandError::Rejected);
    }

    engine
        .out
        .put_slice(format!("+CIPRECVDATA,{}:", data.len()).as_bytes());
    engine.out.put_slice(&data);
    engine.out.put_slice(MSG_OK);

    // Leaving passive mode while data was pending drops the link.
    if !engine.state.passive_recv {
        engine.links.release(link);
    }
    Ok(Reply::Done)
}

/// `AT+CIPRECVLEN?`
pub(crate) fn recv_len(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if !inv.is_query() {
        return Err(CommandError::Syntax);
    }

    let counts: Vec<String> = (0..MAX_LINKS as u8)
        .map(|id| engine.links.available(id).to_string())
        .collect();
    engine
        .out
        .put_slice(format!("+CIPRECVLEN:{}\r\n", counts.join(",")).as_bytes());
    Ok(Reply::Ok)
}
