//! SNTP configuration and wall clock queries.

use bytes::BufMut;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Invocation, Reply};
use crate::engine::Engine;
use crate::error::{CommandError, CommandResult};
use crate::state::SntpConfig;

/// Largest timezone offset in hours.
const MAX_TIMEZONE: u32 = 12;

/// Up to this many SNTP servers are kept.
const MAX_SNTP_SERVERS: usize = 3;

/// Clock readings before this are treated as "never synchronised".
const MIN_VALID_TIME: i64 = 8 * 3600 * 2;

/// Local time when SNTP is on and the clock has been set.
fn local_time(engine: &Engine) -> Option<DateTime<Utc>> {
    let sntp = &engine.state.sntp;
    if !sntp.enabled {
        return None;
    }
    let now = engine.platform.clock.unix_time()?;
    if now <= MIN_VALID_TIME {
        return None;
    }
    DateTime::from_timestamp(now + i64::from(sntp.timezone) * 3600, 0)
}

/// `AT+CIPSNTPCFG`
pub(crate) fn sntp_config(engine: &mut Engine, inv: &Invocation) -> CommandResult<Reply> {
    if inv.is_query() {
        let sntp = &engine.state.sntp;
        let mut text = format!("+CIPSNTPCFG:{}", u8::from(sntp.enabled));
        if sntp.enabled {
            text.push_str(&format!(",{}", sntp.timezone));
            for server in sntp.servers.iter().filter(|s| !s.is_empty()) {
                text.push_str(&format!(",\"{}\"", server));
            }
        }
        text.push_str("\r\n");
        engine.out.put_slice(text.as_bytes());
        return Ok(Reply::Ok);
    }

    let mut cursor = inv.set_args()?;
    let enabled = cursor.read_number_in(0, 1)? == 1;

    let mut timezone = 0i8;
    let mut servers = Vec::new();
    if enabled {
        cursor.expect(b',', "comma")?;
        let negative = cursor.eat(b'-');
        let hours = cursor.read_number_in(0, MAX_TIMEZONE)? as i8;
        timezone = if negative { -hours } else { hours };

        while servers.len() < MAX_SNTP_SERVERS && cursor.eat(b',') {
            servers.push(cursor.read_string(true, true)?);
        }
    }
    cursor.expect_line_end()?;

    let sntp = &mut engine.state.sntp;
    if enabled {
        *sntp = SntpConfig {
            enabled,
            timezone,
            servers,
        };
    } else {
        // Servers and timezone are kept for a later re-enable.
        sntp.enabled = false;
    }

    debug!(enabled, timezone = sntp.timezone, servers = ?sntp.servers, "SNTP configured");
    engine
        .platform
        .clock
        .configure_sntp(sntp.enabled, sntp.timezone, &sntp.servers);
    Ok(Reply::Ok)
}

/// `AT+CIPSNTPTIME?`: local time in `asctime` layout, the epoch when unset.
pub(crate) fn sntp_time(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    let time = local_time(engine).unwrap_or_default();
    engine.out.put_slice(
        format!("+CIPSNTPTIME:{}\nOK\r\n", time.format("%a %b %e %H:%M:%S %Y")).as_bytes(),
    );
    Ok(Reply::Done)
}

/// `AT+SNTPTIME?`: local time as seconds and ISO date.
pub(crate) fn unix_time(engine: &mut Engine, _inv: &Invocation) -> CommandResult<Reply> {
    let Some(time) = local_time(engine) else {
        return Err(CommandError::precondition(
            "+SNTPTIME:Enable SNTP first (AT+CIPSNTPCFG)",
        ));
    };

    engine.out.put_slice(
        format!(
            "+SNTPTIME:{},{}\r\nOK\r\n",
            time.timestamp(),
            time.format("%Y-%m-%d %H:%M:%S")
        )
        .as_bytes(),
    );
    Ok(Reply::Done)
}
