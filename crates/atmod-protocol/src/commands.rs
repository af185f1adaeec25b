//! Command table and line matcher.
//!
//! The table is ordered: an entry whose prefix is a textual prefix of a
//! later entry is only reached after the identifier boundary check, so
//! `+UART` never swallows `+UART_CUR` and `+CIPSTA` never swallows
//! `+CIPSTATUS`.

use log::trace;

/// How a table entry validates the bytes following its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The line must be exactly `AT<prefix>\r\n`.
    Exact,
    /// The prefix must be followed by `?` (exact length) or `=`.
    QuerySet,
    /// Anything may follow the prefix.
    Prefix,
}

/// Persistence scope encoded in a command name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// No suffix. Behaves like `_DEF` for setters.
    Plain,
    /// `_CUR`: applies to the running device only.
    Current,
    /// `_DEF`: applies now and is written to persistent settings.
    Default,
}

impl Scope {
    /// Suffix echoed back in query replies.
    pub fn suffix(&self) -> &'static str {
        match self {
            Scope::Plain => "",
            Scope::Current => "_CUR",
            Scope::Default => "_DEF",
        }
    }

    /// Whether a setter with this scope writes persistent settings.
    pub fn persists(&self) -> bool {
        !matches!(self, Scope::Current)
    }
}

/// Every command the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    At,
    Rst,
    Gmr,
    Echo,
    Restore,
    Uart(Scope),
    SysRam,
    CwMode(Scope),
    CwJap(Scope),
    CwLapOpt,
    CwLap,
    CwQap,
    CwSap(Scope),
    CwDhcp(Scope),
    CwAutoConn,
    CipStaMac(Scope),
    CipApMac(Scope),
    CipSta(Scope),
    CipAp(Scope),
    CwHostname,
    CipStatus,
    CipDomain,
    CipStart,
    CipSslSize,
    CipSend,
    CipCloseMode,
    CipClose,
    Cifsr,
    CipMux,
    CipDinfo,
    CipServer,
    CipServerMaxConn,
    CipSto,
    CipRecvMode,
    CipRecvData,
    CipRecvLen,
    CipSntpCfg,
    CipSntpTime,
    CipDns(Scope),
    SysCpuFreq,
    RfMode,
    CipSslAuth,
    CipSslFp,
    CipSslCertMax,
    CipSslCert,
    CipSslMfln,
    CipSslSta,
    SntpTime,
}

impl CommandCode {
    /// Persistence scope for commands that have `_CUR`/`_DEF` variants.
    pub fn scope(&self) -> Scope {
        match *self {
            CommandCode::Uart(s)
            | CommandCode::CwMode(s)
            | CommandCode::CwJap(s)
            | CommandCode::CwSap(s)
            | CommandCode::CwDhcp(s)
            | CommandCode::CipStaMac(s)
            | CommandCode::CipApMac(s)
            | CommandCode::CipSta(s)
            | CommandCode::CipAp(s)
            | CommandCode::CipDns(s) => s,
            _ => Scope::Plain,
        }
    }

    /// Table entry for this code.
    pub fn descriptor(&self) -> Option<&'static CommandDescriptor> {
        COMMAND_TABLE.iter().find(|d| d.code == *self)
    }

    /// Offset of the first byte after `AT<prefix>` in a matched line.
    pub fn args_offset(&self) -> usize {
        self.descriptor().map_or(2, |d| 2 + d.prefix.len())
    }
}

/// One row of the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Text following `AT`.
    pub prefix: &'static str,
    /// How the remainder of the line is validated.
    pub mode: MatchMode,
    /// Code produced on a match.
    pub code: CommandCode,
}

const fn entry(prefix: &'static str, mode: MatchMode, code: CommandCode) -> CommandDescriptor {
    CommandDescriptor { prefix, mode, code }
}

use CommandCode as C;
use MatchMode::{Exact, Prefix, QuerySet};
use Scope as S;

/// The ordered command table.
pub static COMMAND_TABLE: &[CommandDescriptor] = &[
    // Basic
    entry("+RST", Exact, C::Rst),
    entry("+GMR", Exact, C::Gmr),
    entry("E", Prefix, C::Echo),
    entry("+RESTORE", Exact, C::Restore),
    entry("+UART", QuerySet, C::Uart(S::Plain)),
    entry("+UART_CUR", QuerySet, C::Uart(S::Current)),
    entry("+UART_DEF", QuerySet, C::Uart(S::Default)),
    entry("+SYSRAM?", Exact, C::SysRam),
    // WiFi
    entry("+CWMODE", QuerySet, C::CwMode(S::Plain)),
    entry("+CWMODE_CUR", QuerySet, C::CwMode(S::Current)),
    entry("+CWMODE_DEF", QuerySet, C::CwMode(S::Default)),
    entry("+CWJAP", QuerySet, C::CwJap(S::Plain)),
    entry("+CWJAP_CUR", QuerySet, C::CwJap(S::Current)),
    entry("+CWJAP_DEF", QuerySet, C::CwJap(S::Default)),
    entry("+CWLAPOPT", QuerySet, C::CwLapOpt),
    entry("+CWLAP", Exact, C::CwLap),
    entry("+CWQAP", Exact, C::CwQap),
    entry("+CWSAP", QuerySet, C::CwSap(S::Plain)),
    entry("+CWSAP_CUR", QuerySet, C::CwSap(S::Current)),
    entry("+CWSAP_DEF", QuerySet, C::CwSap(S::Default)),
    entry("+CWDHCP", QuerySet, C::CwDhcp(S::Plain)),
    entry("+CWDHCP_CUR", QuerySet, C::CwDhcp(S::Current)),
    entry("+CWDHCP_DEF", QuerySet, C::CwDhcp(S::Default)),
    entry("+CWAUTOCONN", QuerySet, C::CwAutoConn),
    entry("+CIPSTAMAC", QuerySet, C::CipStaMac(S::Plain)),
    entry("+CIPSTAMAC_CUR", QuerySet, C::CipStaMac(S::Current)),
    entry("+CIPSTAMAC_DEF", QuerySet, C::CipStaMac(S::Default)),
    entry("+CIPAPMAC", QuerySet, C::CipApMac(S::Plain)),
    entry("+CIPAPMAC_CUR", QuerySet, C::CipApMac(S::Current)),
    entry("+CIPAPMAC_DEF", QuerySet, C::CipApMac(S::Default)),
    entry("+CIPSTA", QuerySet, C::CipSta(S::Plain)),
    entry("+CIPSTA_CUR", QuerySet, C::CipSta(S::Current)),
    entry("+CIPSTA_DEF", QuerySet, C::CipSta(S::Default)),
    entry("+CIPAP", QuerySet, C::CipAp(S::Plain)),
    entry("+CIPAP_CUR", QuerySet, C::CipAp(S::Current)),
    entry("+CIPAP_DEF", QuerySet, C::CipAp(S::Default)),
    entry("+CWHOSTNAME", QuerySet, C::CwHostname),
    // TCP/IP
    entry("+CIPSTATUS", Exact, C::CipStatus),
    entry("+CIPDOMAIN", QuerySet, C::CipDomain),
    entry("+CIPSTART", Prefix, C::CipStart),
    entry("+CIPSSLSIZE", QuerySet, C::CipSslSize),
    entry("+CIPSEND", Prefix, C::CipSend),
    entry("+CIPCLOSEMODE", Prefix, C::CipCloseMode),
    entry("+CIPCLOSE", Prefix, C::CipClose),
    entry("+CIFSR", Exact, C::Cifsr),
    entry("+CIPMUX", QuerySet, C::CipMux),
    entry("+CIPDINFO", QuerySet, C::CipDinfo),
    entry("+CIPSERVER", Prefix, C::CipServer),
    entry("+CIPSERVERMAXCONN", QuerySet, C::CipServerMaxConn),
    entry("+CIPSTO", QuerySet, C::CipSto),
    entry("+CIPRECVMODE", QuerySet, C::CipRecvMode),
    entry("+CIPRECVDATA", QuerySet, C::CipRecvData),
    entry("+CIPRECVLEN", QuerySet, C::CipRecvLen),
    entry("+CIPSNTPCFG", QuerySet, C::CipSntpCfg),
    entry("+CIPSNTPTIME?", Exact, C::CipSntpTime),
    entry("+CIPDNS", QuerySet, C::CipDns(S::Plain)),
    entry("+CIPDNS_CUR", QuerySet, C::CipDns(S::Current)),
    entry("+CIPDNS_DEF", QuerySet, C::CipDns(S::Default)),
    // Extensions
    entry("+SYSCPUFREQ", QuerySet, C::SysCpuFreq),
    entry("+RFMODE", QuerySet, C::RfMode),
    entry("+CIPSSLAUTH", QuerySet, C::CipSslAuth),
    entry("+CIPSSLFP", QuerySet, C::CipSslFp),
    entry("+CIPSSLCERTMAX", QuerySet, C::CipSslCertMax),
    entry("+CIPSSLCERT", Prefix, C::CipSslCert),
    entry("+CIPSSLMFLN", QuerySet, C::CipSslMfln),
    entry("+CIPSSLSTA", Prefix, C::CipSslSta),
    entry("+SNTPTIME?", Exact, C::SntpTime),
];

/// Whether `c` would continue a command identifier.
fn continues_identifier(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// Resolve a complete command line to a command code.
///
/// `line` must include its `\r\n` terminator. Returns `None` for anything
/// that should be answered with `ERROR`.
///
/// An entry claims a line when its prefix matches and the next byte does
/// not continue the identifier. A claimed line is validated against the
/// entry's mode and never falls through to later entries.
pub fn find_command(line: &[u8]) -> Option<CommandCode> {
    let len = line.len();
    if len < 4 || !line.starts_with(b"AT") || !line.ends_with(b"\r\n") {
        return None;
    }

    if len == 4 {
        return Some(CommandCode::At);
    }

    let body = &line[2..];

    for descriptor in COMMAND_TABLE {
        let prefix = descriptor.prefix.as_bytes();
        if !body.starts_with(prefix) {
            continue;
        }

        let next = body.get(prefix.len()).copied().unwrap_or(b'\r');
        if continues_identifier(next) {
            continue;
        }

        trace!("line claimed by {:?} ({:?})", descriptor.code, descriptor.mode);

        return match descriptor.mode {
            MatchMode::Exact => (len == prefix.len() + 4).then_some(descriptor.code),
            MatchMode::QuerySet => match next {
                b'=' => Some(descriptor.code),
                b'?' if len == prefix.len() + 5 => Some(descriptor.code),
                _ => None,
            },
            MatchMode::Prefix => Some(descriptor.code),
        };
    }

    None
}
