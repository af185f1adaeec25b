//! Command handlers.
//!
//! Every command code maps onto one [`Handler`]. A handler reads its
//! arguments through a [`ParseCursor`] over the matched line, acts on the
//! engine and either writes its reply directly or leaves a terminal
//! [`Reply`] for the dispatcher to render.

use atmod_protocol::{CommandCode, ParseCursor, Scope};
use bytes::Bytes;

use crate::engine::Engine;
use crate::error::{CommandError, CommandResult};

mod basic;
mod ssl;
mod tcpip;
mod time;
mod wifi;

pub(crate) use wifi::render_scan;

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Append `OK`.
    Ok,
    /// The handler wrote its full reply.
    Done,
    /// The reply arrives when the pending operation completes.
    Deferred,
    /// Append `OK`, then restart the device.
    Restart,
}

/// A matched command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub code: CommandCode,
    /// The whole line including `AT` and `\r\n`.
    pub line: Bytes,
}

impl Invocation {
    pub fn new(code: CommandCode, line: Bytes) -> Self {
        Invocation { code, line }
    }

    /// Offset of the first byte after the command name.
    pub fn args_offset(&self) -> usize {
        self.code.args_offset()
    }

    /// Cursor positioned right after the command name.
    pub fn cursor(&self) -> ParseCursor<'_> {
        ParseCursor::at(&self.line, self.args_offset())
    }

    /// Whether this is the `?` form.
    pub fn is_query(&self) -> bool {
        let cursor = self.cursor();
        cursor.peek() == Some(b'?') && cursor.peek_at(1) == Some(b'\r')
    }

    /// Whether nothing follows the command name.
    pub fn is_bare(&self) -> bool {
        self.cursor().at_line_end()
    }

    /// Cursor positioned after the `=` of a set form.
    pub fn set_args(&self) -> CommandResult<ParseCursor<'_>> {
        let mut cursor = self.cursor();
        if !cursor.eat(b'=') {
            return Err(CommandError::Syntax);
        }
        Ok(cursor)
    }

    pub fn scope(&self) -> Scope {
        self.code.scope()
    }

    /// `_CUR`/`_DEF` suffix echoed in query replies.
    pub fn suffix(&self) -> &'static str {
        self.scope().suffix()
    }
}

/// Signature shared by every command handler.
pub type Handler = fn(&mut Engine, &Invocation) -> CommandResult<Reply>;

/// Handler for a command code.
pub fn handler_for(code: CommandCode) -> Handler {
    use CommandCode as C;

    match code {
        C::At => basic::at,
        C::Rst => basic::restart,
        C::Gmr => basic::version,
        C::Echo => basic::echo,
        C::Restore => basic::restore,
        C::Uart(_) => basic::uart,
        C::SysRam => basic::sysram,
        C::SysCpuFreq => basic::cpu_freq,
        C::RfMode => basic::rf_mode,

        C::CwMode(_) => wifi::mode,
        C::CwJap(_) => wifi::join,
        C::CwLapOpt => wifi::scan_options,
        C::CwLap => wifi::scan,
        C::CwQap => wifi::quit,
        C::CwSap(_) => wifi::soft_ap,
        C::CwDhcp(_) => wifi::dhcp,
        C::CwAutoConn => wifi::auto_connect,
        C::CipStaMac(_) => wifi::station_mac,
        C::CipApMac(_) => wifi::soft_ap_mac,
        C::CipSta(_) => wifi::station_ip,
        C::CipAp(_) => wifi::soft_ap_ip,
        C::CwHostname => wifi::hostname,
        C::CipDns(_) => wifi::dns,

        C::CipStatus => tcpip::status,
        C::CipDomain => tcpip::domain,
        C::CipStart => tcpip::start,
        C::CipSend => tcpip::send,
        C::CipCloseMode => tcpip::close_mode,
        C::CipClose => tcpip::close,
        C::Cifsr => tcpip::local_address,
        C::CipMux => tcpip::mux,
        C::CipDinfo => tcpip::show_remote,
        C::CipServer => tcpip::server,
        C::CipServerMaxConn => tcpip::server_max_connections,
        C::CipSto => tcpip::server_timeout,
        C::CipRecvMode => tcpip::recv_mode,
        C::CipRecvData => tcpip::recv_data,
        C::CipRecvLen => tcpip::recv_len,

        C::CipSslSize => ssl::buffer_size,
        C::CipSslAuth => ssl::auth,
        C::CipSslFp => ssl::fingerprint,
        C::CipSslCertMax => ssl::cert_max,
        C::CipSslCert => ssl::cert,
        C::CipSslMfln => ssl::mfln,
        C::CipSslSta => ssl::status,

        C::CipSntpCfg => time::sntp_config,
        C::CipSntpTime => time::sntp_time,
        C::SntpTime => time::unix_time,
    }
}

// ============================================================================
// Shared argument helpers
// ============================================================================

/// Read a number in range and require the line end after it.
pub(crate) fn read_last_number(cursor: &mut ParseCursor<'_>, min: u32, max: u32) -> CommandResult<u32> {
    let value = cursor.read_number_in(min, max)?;
    cursor.expect_line_end()?;
    Ok(value)
}

/// Read a number in range followed by a comma.
pub(crate) fn read_number_then_comma(
    cursor: &mut ParseCursor<'_>,
    min: u32,
    max: u32,
) -> CommandResult<u32> {
    let value = cursor.read_number_in(min, max)?;
    cursor.expect(b',', "comma")?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmod_protocol::find_command;

    fn invocation(line: &[u8]) -> Invocation {
        let code = find_command(line).expect("command");
        Invocation::new(code, Bytes::copy_from_slice(line))
    }

    #[test]
    fn test_query_and_set_forms() {
        let query = invocation(b"AT+CWMODE_CUR?\r\n");
        assert!(query.is_query());
        assert_eq!(query.suffix(), "_CUR");

        let set = invocation(b"AT+CWMODE=1\r\n");
        assert!(!set.is_query());
        let mut cursor = set.set_args().expect("set form");
        assert_eq!(read_last_number(&mut cursor, 0, 3), Ok(1));
    }

    #[test]
    fn test_bare_prefix_command() {
        let bare = invocation(b"AT+CIPCLOSE\r\n");
        assert!(bare.is_bare());
        assert_eq!(bare.set_args().err(), Some(CommandError::Syntax));
    }
}
