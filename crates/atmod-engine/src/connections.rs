//! Link slots and listening sockets.
//!
//! The table owns up to [`MAX_LINKS`] connections addressed by link id and
//! up to [`MAX_SERVERS`] listening sockets. Without multiplexing only link 0
//! is usable.
//!
//! [`ConnectionTable::poll`] does the per-turn bookkeeping: it forwards or
//! announces received data, reaps closed links, accepts server peers and
//! times out idle server links. Everything it has to say goes into the
//! output buffer handed to it.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::error::{LinkError, NetError};
use crate::telemetry::metric_defs;
use crate::platform::{Connection, LinkKind, Listener, NetworkStack};

/// Number of link slots.
pub const MAX_LINKS: usize = 5;

/// Number of listening sockets.
pub const MAX_SERVERS: usize = 3;

/// Memory shared by the receive buffers of all TLS sessions.
pub const TLS_MEMORY_BUDGET: usize = 20480;

/// Default TLS receive buffer size.
pub const DEFAULT_SSL_BUFFER: usize = 16384;

/// Largest write handed to a connection at once.
pub const SEND_CHUNK: usize = 512;

/// How long each chunk may wait for the connection to become writable.
pub const CHUNK_TIMEOUT: Duration = Duration::from_millis(500);

/// Largest payload forwarded in one `+IPD` notice.
pub const MAX_IPD_CHUNK: usize = 2048;

// ============================================================================
// Slots
// ============================================================================

/// State of one occupied link slot.
pub struct ConnectionSlot {
    connection: Option<Box<dyn Connection>>,
    kind: LinkKind,
    reservation: usize,
    send_length: usize,
    last_available: usize,
    last_activity: u64,
    from_server: bool,
}

impl ConnectionSlot {
    fn new(kind: LinkKind, reservation: usize) -> Self {
        ConnectionSlot {
            connection: None,
            kind,
            reservation,
            send_length: 0,
            last_available: 0,
            last_activity: 0,
            from_server: false,
        }
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// The live connection, once attached.
    pub fn connection(&self) -> Option<&dyn Connection> {
        self.connection.as_deref()
    }

    /// Whether the link holds a connection whose peer is still there.
    pub fn is_alive(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.connected())
    }

    /// Whether the link was accepted by a local server.
    pub fn from_server(&self) -> bool {
        self.from_server
    }

    /// Payload length the link is armed for, zero when not armed.
    pub fn send_length(&self) -> usize {
        self.send_length
    }

    /// TLS buffer memory held by this link.
    pub fn reservation(&self) -> usize {
        self.reservation
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("kind", &self.kind)
            .field("attached", &self.connection.is_some())
            .field("reservation", &self.reservation)
            .field("send_length", &self.send_length)
            .field("last_available", &self.last_available)
            .field("from_server", &self.from_server)
            .finish()
    }
}

/// Settings that shape what [`ConnectionTable::poll`] reports.
#[derive(Debug, Clone, Copy)]
pub struct PollContext {
    /// Passive receive mode (`AT+CIPRECVMODE=1`).
    pub passive: bool,
    /// Append the remote address to `+IPD` (`AT+CIPDINFO=1`).
    pub show_remote: bool,
    /// Most server-accepted links allowed at once.
    pub max_server_connections: usize,
    /// Idle timeout for server-accepted links, zero to disable.
    pub server_timeout_ms: u64,
}

// ============================================================================
// Table
// ============================================================================

/// Bounded link and listening socket manager.
pub struct ConnectionTable {
    slots: [Option<ConnectionSlot>; MAX_LINKS],
    servers: [Option<Box<dyn Listener>>; MAX_SERVERS],
    multiplexed: bool,
    ssl_buffer_size: usize,
    armed: Option<u8>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            slots: Default::default(),
            servers: Default::default(),
            multiplexed: false,
            ssl_buffer_size: DEFAULT_SSL_BUFFER,
            armed: None,
        }
    }

    pub fn multiplexed(&self) -> bool {
        self.multiplexed
    }

    pub fn set_multiplexed(&mut self, enabled: bool) {
        self.multiplexed = enabled;
    }

    /// Receive buffer size reserved by new TLS links.
    pub fn ssl_buffer_size(&self) -> usize {
        self.ssl_buffer_size
    }

    pub fn set_ssl_buffer_size(&mut self, size: usize) {
        self.ssl_buffer_size = size;
    }

    fn usable_slots(&self) -> usize {
        if self.multiplexed {
            MAX_LINKS
        } else {
            1
        }
    }

    /// TLS buffer memory not held by any link.
    pub fn tls_memory_available(&self) -> usize {
        let used: usize = self.slots.iter().flatten().map(|s| s.reservation).sum();
        TLS_MEMORY_BUDGET.saturating_sub(used)
    }

    fn reservation_for(&self, kind: LinkKind) -> Result<usize, LinkError> {
        if kind != LinkKind::Ssl {
            return Ok(0);
        }
        let requested = self.ssl_buffer_size;
        let available = self.tls_memory_available();
        if requested > available {
            return Err(LinkError::TlsBudget {
                requested,
                available,
            });
        }
        Ok(requested)
    }

    /// Claim the lowest free slot.
    pub fn allocate(&mut self, kind: LinkKind) -> Result<u8, LinkError> {
        let id = self.slots[..self.usable_slots()]
            .iter()
            .position(Option::is_none)
            .ok_or(LinkError::NoFreeSlot)?;
        self.claim(id, kind)
    }

    /// Claim a specific slot.
    pub fn allocate_at(&mut self, id: u8, kind: LinkKind) -> Result<u8, LinkError> {
        let index = id as usize;
        if index >= self.usable_slots() {
            return Err(LinkError::InvalidId(id));
        }
        if self.slots[index].is_some() {
            return Err(LinkError::InUse(id));
        }
        self.claim(index, kind)
    }

    fn claim(&mut self, index: usize, kind: LinkKind) -> Result<u8, LinkError> {
        let reservation = self.reservation_for(kind)?;
        self.slots[index] = Some(ConnectionSlot::new(kind, reservation));
        metrics::gauge!(metric_defs::LINKS_OPEN.name).increment(1.0);
        debug!(link = index, %kind, reservation, "link allocated");
        Ok(index as u8)
    }

    /// Put a live connection into an allocated slot.
    pub fn attach(
        &mut self,
        id: u8,
        connection: Box<dyn Connection>,
        from_server: bool,
        now: u64,
    ) -> Result<(), LinkError> {
        let slot = self.slot_mut(id)?;
        slot.connection = Some(connection);
        slot.from_server = from_server;
        slot.last_available = 0;
        slot.last_activity = now;
        Ok(())
    }

    /// Close and forget a link. Returns whether the slot was occupied.
    pub fn release(&mut self, id: u8) -> bool {
        let Some(entry) = self.slots.get_mut(id as usize) else {
            return false;
        };
        let Some(mut slot) = entry.take() else {
            return false;
        };
        if let Some(connection) = slot.connection.as_mut() {
            connection.close();
        }
        if self.armed == Some(id) {
            self.armed = None;
        }
        metrics::gauge!(metric_defs::LINKS_OPEN.name).decrement(1.0);
        debug!(link = id, "link released");
        true
    }

    /// Release every link.
    pub fn release_all(&mut self) {
        for id in 0..MAX_LINKS as u8 {
            self.release(id);
        }
    }

    pub fn get(&self, id: u8) -> Option<&ConnectionSlot> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: u8) -> Result<&mut ConnectionSlot, LinkError> {
        self.slots
            .get_mut(id as usize)
            .ok_or(LinkError::InvalidId(id))?
            .as_mut()
            .ok_or(LinkError::NotConnected(id))
    }

    /// Whether the slot holds a connection whose peer is still there.
    pub fn is_alive(&self, id: u8) -> bool {
        self.get(id).is_some_and(ConnectionSlot::is_alive)
    }

    /// Whether any slot is occupied.
    pub fn any_occupied(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Occupied slots in id order.
    pub fn links(&self) -> impl Iterator<Item = (u8, &ConnectionSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i as u8, s)))
    }

    /// Bytes waiting to be read on a link, zero for an empty slot.
    pub fn available(&self, id: u8) -> usize {
        self.get(id)
            .and_then(ConnectionSlot::connection)
            .map_or(0, |c| c.available())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Arm a live link for a payload of `len` bytes.
    pub fn arm_send(&mut self, id: u8, len: usize) -> Result<(), LinkError> {
        if !self.is_alive(id) {
            return Err(LinkError::NotConnected(id));
        }
        if let Some(previous) = self.armed.take() {
            if let Ok(slot) = self.slot_mut(previous) {
                slot.send_length = 0;
            }
        }
        self.slot_mut(id)?.send_length = len;
        self.armed = Some(id);
        Ok(())
    }

    /// The link armed for a payload, if any.
    pub fn armed(&self) -> Option<u8> {
        self.armed
    }

    /// Forget the armed payload.
    pub fn disarm(&mut self) {
        if let Some(id) = self.armed.take() {
            if let Ok(slot) = self.slot_mut(id) {
                slot.send_length = 0;
            }
        }
    }

    /// Write `data` to a link in [`SEND_CHUNK`] pieces.
    ///
    /// A chunk that cannot be written within [`CHUNK_TIMEOUT`] aborts the
    /// write; the link stays open.
    pub fn send(&mut self, id: u8, data: &[u8], now: u64) -> Result<(), LinkError> {
        let slot = self.slot_mut(id)?;
        let kind = slot.kind;
        let connection = match slot.connection.as_mut() {
            Some(c) if c.connected() => c,
            _ => return Err(LinkError::NotConnected(id)),
        };

        for chunk in data.chunks(SEND_CHUNK) {
            let deadline = Instant::now() + CHUNK_TIMEOUT;
            let mut written = 0;
            while written < chunk.len() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !connection.wait_writable(remaining) {
                    warn!(link = id, written, "send timed out");
                    return Err(NetError::Timeout.into());
                }
                let n = connection.write(&chunk[written..])?;
                if n == 0 && !connection.connected() {
                    return Err(NetError::Closed.into());
                }
                written += n;
            }
        }

        slot.last_activity = now;
        metrics::counter!(metric_defs::LINK_TX_BYTES.name, "kind" => kind.as_str())
            .increment(data.len() as u64);
        trace!(link = id, len = data.len(), "payload sent");
        Ok(())
    }

    /// Read up to `max` bytes from a link.
    pub fn read(&mut self, id: u8, max: usize, now: u64) -> Result<Vec<u8>, LinkError> {
        let slot = self.slot_mut(id)?;
        let kind = slot.kind;
        let connection = slot.connection.as_mut().ok_or(LinkError::NotConnected(id))?;

        let want = max.min(connection.available());
        let mut buf = vec![0u8; want];
        let n = connection.read(&mut buf);
        buf.truncate(n);

        slot.last_available = slot.last_available.saturating_sub(n);
        if n > 0 {
            slot.last_activity = now;
            metrics::counter!(metric_defs::LINK_RX_BYTES.name, "kind" => kind.as_str())
                .increment(n as u64);
        }
        Ok(buf)
    }

    // ========================================================================
    // Servers
    // ========================================================================

    /// Whether a server is listening on `port`.
    pub fn server_running(&self, port: u16) -> bool {
        self.servers.iter().flatten().any(|s| s.port() == port)
    }

    /// Whether any server is listening.
    pub fn any_server(&self) -> bool {
        self.servers.iter().any(Option::is_some)
    }

    /// Open a listening socket in the first free server slot.
    pub fn start_server(&mut self, net: &mut dyn NetworkStack, port: u16) -> Result<(), LinkError> {
        let entry = self
            .servers
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(LinkError::NoFreeServer)?;
        let listener = net.listen(port)?;
        *entry = Some(listener);
        info!(port, "server listening");
        Ok(())
    }

    /// Close the server on `port`, or the first running one when `port` is
    /// `None`. Returns whether a server was closed.
    pub fn stop_server(&mut self, port: Option<u16>) -> bool {
        let found = self
            .servers
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|l| port.map_or(true, |p| l.port() == p)));
        match found {
            Some(entry) => {
                if let Some(mut listener) = entry.take() {
                    info!(port = listener.port(), "server closed");
                    listener.close();
                }
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Per-turn bookkeeping for every link and server.
    pub fn poll(&mut self, ctx: &PollContext, now: u64, out: &mut BytesMut) {
        for id in 0..MAX_LINKS as u8 {
            self.poll_link(id, ctx, now, out);
        }
        self.accept_peers(ctx, now, out);
    }

    fn write_closed(&self, id: u8, out: &mut BytesMut) {
        if self.multiplexed {
            out.put_slice(format!("{},CLOSED\r\n", id).as_bytes());
        } else {
            out.put_slice(b"CLOSED\r\n");
        }
    }

    fn poll_link(&mut self, id: u8, ctx: &PollContext, now: u64, out: &mut BytesMut) {
        let multiplexed = self.multiplexed;
        let Some(slot) = self.slots[id as usize].as_mut() else {
            return;
        };
        let Some(connection) = slot.connection.as_mut() else {
            return;
        };

        let available = connection.available();

        if available > 0 && !ctx.passive {
            let mut data = vec![0u8; available.min(MAX_IPD_CHUNK)];
            let n = connection.read(&mut data);
            data.truncate(n);
            if n > 0 {
                let remote = connection.remote_addr();
                out.put_slice(b"\r\n+IPD,");
                if multiplexed {
                    out.put_slice(format!("{},", id).as_bytes());
                }
                out.put_slice(n.to_string().as_bytes());
                if ctx.show_remote {
                    out.put_slice(format!(",{},{}", remote.ip(), remote.port()).as_bytes());
                }
                out.put_u8(b':');
                out.put_slice(&data);
                slot.last_activity = now;
                slot.last_available = 0;
                metrics::counter!(metric_defs::LINK_RX_BYTES.name, "kind" => slot.kind.as_str())
                    .increment(n as u64);
                trace!(link = id, len = n, "forwarded");
            }
            return;
        }

        if ctx.passive && available != slot.last_available {
            if available > slot.last_available {
                if multiplexed {
                    out.put_slice(format!("+IPD,{},{}\r\n", id, available).as_bytes());
                } else {
                    out.put_slice(format!("+IPD,{}\r\n", available).as_bytes());
                }
                slot.last_activity = now;
            }
            slot.last_available = available;
        }

        if available == 0 && !connection.connected() {
            debug!(link = id, "peer closed");
            self.release(id);
            self.write_closed(id, out);
            return;
        }

        let idle = now.saturating_sub(slot.last_activity);
        if slot.from_server && ctx.server_timeout_ms > 0 && idle > ctx.server_timeout_ms {
            info!(link = id, idle, "server link timed out");
            self.release(id);
            self.write_closed(id, out);
        }
    }

    fn accept_peers(&mut self, ctx: &PollContext, now: u64, out: &mut BytesMut) {
        for index in 0..MAX_SERVERS {
            loop {
                let accepted = self.links().filter(|(_, s)| s.from_server).count();
                if accepted >= ctx.max_server_connections {
                    break;
                }
                let Some(listener) = self.servers[index].as_mut() else {
                    break;
                };
                let Some(mut connection) = listener.accept() else {
                    break;
                };

                match self.allocate(LinkKind::Tcp) {
                    Ok(id) => {
                        let remote = connection.remote_addr();
                        if self.attach(id, connection, true, now).is_ok() {
                            info!(link = id, %remote, "peer accepted");
                            out.put_slice(format!("{},CONNECT\r\n", id).as_bytes());
                        }
                    }
                    Err(e) => {
                        warn!("peer refused: {}", e);
                        connection.close();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, MockNetwork};

    fn ctx() -> PollContext {
        PollContext {
            passive: false,
            show_remote: false,
            max_server_connections: 5,
            server_timeout_ms: 180_000,
        }
    }

    fn mux_table() -> ConnectionTable {
        let mut table = ConnectionTable::new();
        table.set_multiplexed(true);
        table
    }

    #[test]
    fn test_allocate_lowest_free() {
        let mut table = mux_table();
        for expected in 0..5 {
            assert_eq!(table.allocate(LinkKind::Tcp), Ok(expected));
        }
        assert_eq!(table.allocate(LinkKind::Tcp), Err(LinkError::NoFreeSlot));

        assert!(table.release(2));
        assert_eq!(table.allocate(LinkKind::Tcp), Ok(2));
    }

    #[test]
    fn test_single_slot_without_mux() {
        let mut table = ConnectionTable::new();
        assert_eq!(table.allocate(LinkKind::Tcp), Ok(0));
        assert_eq!(table.allocate(LinkKind::Tcp), Err(LinkError::NoFreeSlot));
        assert_eq!(table.allocate_at(3, LinkKind::Tcp), Err(LinkError::InvalidId(3)));
    }

    #[test]
    fn test_allocate_at() {
        let mut table = mux_table();
        assert_eq!(table.allocate_at(3, LinkKind::Tcp), Ok(3));
        assert_eq!(table.allocate_at(3, LinkKind::Tcp), Err(LinkError::InUse(3)));
        assert_eq!(table.allocate(LinkKind::Tcp), Ok(0));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut table = mux_table();
        table.allocate(LinkKind::Tcp).unwrap();
        assert!(table.release(0));
        assert!(!table.release(0));
        assert!(!table.release(9));
    }

    #[test]
    fn test_tls_budget() {
        let mut table = mux_table();
        assert_eq!(table.allocate(LinkKind::Ssl), Ok(0));
        assert_eq!(
            table.allocate(LinkKind::Ssl),
            Err(LinkError::TlsBudget {
                requested: DEFAULT_SSL_BUFFER,
                available: TLS_MEMORY_BUDGET - DEFAULT_SSL_BUFFER,
            })
        );
        // Plain TCP is not limited by the TLS budget.
        assert_eq!(table.allocate(LinkKind::Tcp), Ok(1));

        table.set_ssl_buffer_size(4096);
        assert_eq!(table.allocate(LinkKind::Ssl), Ok(2));

        table.release(0);
        assert_eq!(table.tls_memory_available(), TLS_MEMORY_BUDGET - 4096);
    }

    #[test]
    fn test_send_chunks() {
        let mut table = ConnectionTable::new();
        let conn = MockConnection::new();
        let handle = conn.handle();
        let id = table.allocate(LinkKind::Tcp).unwrap();
        table.attach(id, Box::new(conn), false, 0).unwrap();

        let payload = vec![7u8; 1300];
        table.send(id, &payload, 10).unwrap();

        let state = handle.borrow();
        assert_eq!(state.writes.iter().map(Vec::len).collect::<Vec<_>>(), vec![512, 512, 276]);
    }

    #[test]
    fn test_send_timeout_keeps_link() {
        let mut table = ConnectionTable::new();
        let conn = MockConnection::new();
        conn.handle().borrow_mut().writable = false;
        let id = table.allocate(LinkKind::Tcp).unwrap();
        table.attach(id, Box::new(conn), false, 0).unwrap();

        assert_eq!(table.send(id, b"abc", 0), Err(LinkError::Net(NetError::Timeout)));
        assert!(table.is_alive(id));
    }

    #[test]
    fn test_send_stalled_write_times_out() {
        let mut table = ConnectionTable::new();
        let conn = MockConnection::new();
        conn.handle().borrow_mut().stalled = true;
        let id = table.allocate(LinkKind::Tcp).unwrap();
        table.attach(id, Box::new(conn), false, 0).unwrap();

        let started = Instant::now();
        assert_eq!(table.send(id, b"abc", 0), Err(LinkError::Net(NetError::Timeout)));
        let elapsed = started.elapsed();
        assert!(elapsed >= CHUNK_TIMEOUT);
        assert!(elapsed < CHUNK_TIMEOUT * 4);
        assert!(table.is_alive(id));
    }

    #[test]
    fn test_send_requires_live_link() {
        let mut table = ConnectionTable::new();
        assert_eq!(table.send(0, b"x", 0), Err(LinkError::NotConnected(0)));

        let conn = MockConnection::new();
        conn.handle().borrow_mut().connected = false;
        table.allocate(LinkKind::Tcp).unwrap();
        table.attach(0, Box::new(conn), false, 0).unwrap();
        assert_eq!(table.send(0, b"x", 0), Err(LinkError::NotConnected(0)));
    }

    #[test]
    fn test_poll_forwards_active_data() {
        let mut table = mux_table();
        let conn = MockConnection::new();
        conn.handle().borrow_mut().inbound.extend(b"hello");
        table.allocate_at(2, LinkKind::Tcp).unwrap();
        table.attach(2, Box::new(conn), false, 0).unwrap();

        let mut out = BytesMut::new();
        table.poll(&ctx(), 1, &mut out);
        assert_eq!(&out[..], b"\r\n+IPD,2,5:hello");
    }

    #[test]
    fn test_poll_passive_notice_is_edge_triggered() {
        let mut table = ConnectionTable::new();
        let conn = MockConnection::new();
        let handle = conn.handle();
        handle.borrow_mut().inbound.extend(b"abc");
        table.allocate(LinkKind::Tcp).unwrap();
        table.attach(0, Box::new(conn), false, 0).unwrap();

        let passive = PollContext {
            passive: true,
            ..ctx()
        };
        let mut out = BytesMut::new();
        table.poll(&passive, 1, &mut out);
        assert_eq!(&out[..], b"+IPD,3\r\n");

        out.clear();
        table.poll(&passive, 2, &mut out);
        assert!(out.is_empty());

        handle.borrow_mut().inbound.extend(b"de");
        table.poll(&passive, 3, &mut out);
        assert_eq!(&out[..], b"+IPD,5\r\n");

        assert_eq!(table.read(0, 4, 4).unwrap(), b"abcd");
        out.clear();
        table.poll(&passive, 5, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_poll_reaps_closed_link() {
        let mut table = mux_table();
        let conn = MockConnection::new();
        conn.handle().borrow_mut().connected = false;
        table.allocate_at(1, LinkKind::Tcp).unwrap();
        table.attach(1, Box::new(conn), false, 0).unwrap();

        let mut out = BytesMut::new();
        table.poll(&ctx(), 1, &mut out);
        assert_eq!(&out[..], b"1,CLOSED\r\n");
        assert!(table.get(1).is_none());
    }

    #[test]
    fn test_server_accepts_and_times_out() {
        let mut table = mux_table();
        let mut net = MockNetwork::default();
        let net_state = net.handle();
        table.start_server(&mut net, 333).unwrap();
        assert!(table.server_running(333));

        net_state.borrow_mut().pending_peers.push_back(MockConnection::new());
        let mut out = BytesMut::new();
        table.poll(&ctx(), 1_000, &mut out);
        assert_eq!(&out[..], b"0,CONNECT\r\n");
        assert!(table.get(0).is_some_and(ConnectionSlot::from_server));

        out.clear();
        table.poll(&ctx(), 1_000 + 180_001, &mut out);
        assert_eq!(&out[..], b"0,CLOSED\r\n");
    }

    #[test]
    fn test_server_connection_limit() {
        let mut table = mux_table();
        let mut net = MockNetwork::default();
        let net_state = net.handle();
        table.start_server(&mut net, 80).unwrap();
        for _ in 0..3 {
            net_state.borrow_mut().pending_peers.push_back(MockConnection::new());
        }

        let limited = PollContext {
            max_server_connections: 2,
            ..ctx()
        };
        let mut out = BytesMut::new();
        table.poll(&limited, 0, &mut out);
        assert_eq!(&out[..], b"0,CONNECT\r\n1,CONNECT\r\n");
        assert_eq!(net_state.borrow().pending_peers.len(), 1);
    }

    #[test]
    fn test_stop_server() {
        let mut table = mux_table();
        let mut net = MockNetwork::default();
        table.start_server(&mut net, 80).unwrap();
        table.start_server(&mut net, 81).unwrap();

        assert!(!table.stop_server(Some(82)));
        assert!(table.stop_server(Some(81)));
        assert!(table.stop_server(None));
        assert!(!table.any_server());
    }
}
