//! TCP serial bridge.
//!
//! A host MCU (or a terminal) connects to a TCP port and talks to the engine
//! as if it were the modem's UART. One client is served at a time; a new
//! client is accepted once the previous one disconnects.
//!
//! The socket side runs on tokio. The engine thread talks to it through a
//! [`SerialPort`], which never blocks.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Chunks buffered in each direction.
const CHANNEL_DEPTH: usize = 256;

/// Bytes read from the client per chunk.
const READ_CHUNK: usize = 1024;

/// Engine side of the bridge.
pub struct SerialPort {
    tx_sender: mpsc::Sender<Vec<u8>>,
    rx_receiver: mpsc::Receiver<Vec<u8>>,
    client_connected: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl SerialPort {
    /// Bind `addr` and start serving clients on the current tokio runtime.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx_sender, tx_receiver) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (rx_sender, rx_receiver) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let client_connected = Arc::new(AtomicBool::new(false));

        info!(%local_addr, "serial bridge listening");
        let connected = Arc::clone(&client_connected);
        tokio::spawn(async move {
            if let Err(e) = run_serial_listener(listener, tx_receiver, rx_sender, connected).await {
                warn!(error = %e, "serial listener stopped");
            }
        });

        Ok(SerialPort {
            tx_sender,
            rx_receiver,
            client_connected,
            local_addr,
        })
    }

    /// Address the bridge listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a client is attached.
    pub fn is_client_connected(&self) -> bool {
        self.client_connected.load(Ordering::Acquire)
    }

    /// Next chunk typed by the client, if any.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx_receiver.try_recv().ok()
    }

    /// Queue engine output for the client.
    ///
    /// Output is dropped while nobody is attached, like a UART with no
    /// listener.
    pub fn send(&self, data: &[u8]) {
        if !self.is_client_connected() {
            return;
        }
        if let Err(e) = self.tx_sender.try_send(data.to_vec()) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(len = data.len(), "serial TX buffer full, output dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("serial bridge closed");
                }
            }
        }
    }
}

/// Accept clients one after another.
async fn run_serial_listener(
    listener: TcpListener,
    mut tx_receiver: mpsc::Receiver<Vec<u8>>,
    rx_sender: mpsc::Sender<Vec<u8>>,
    client_connected: Arc<AtomicBool>,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "serial client attached");
        metrics::counter!("atmod.serial.sessions").increment(1);

        // Output queued before the client attached belongs to nobody.
        while tx_receiver.try_recv().is_ok() {}
        client_connected.store(true, Ordering::Release);

        let result = handle_serial_connection(stream, &mut tx_receiver, &rx_sender).await;
        client_connected.store(false, Ordering::Release);

        match result {
            Ok(true) => info!(%peer, "serial client detached"),
            Ok(false) => {
                debug!("engine side dropped, bridge exiting");
                return Ok(());
            }
            Err(e) => warn!(%peer, error = %e, "serial connection error"),
        }
    }
}

/// Pump bytes both ways until the client leaves.
///
/// Returns `Ok(false)` when the engine side went away.
async fn handle_serial_connection(
    mut stream: TcpStream,
    tx_receiver: &mut mpsc::Receiver<Vec<u8>>,
    rx_sender: &mpsc::Sender<Vec<u8>>,
) -> io::Result<bool> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.split();
    let mut read_buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(true);
                }
                if rx_sender.send(read_buf[..n].to_vec()).await.is_err() {
                    return Ok(false);
                }
            }

            data = tx_receiver.recv() => {
                let Some(data) = data else {
                    return Ok(false);
                };
                writer.write_all(&data).await?;
                writer.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv_chunk(port: &mut SerialPort) -> Vec<u8> {
        for _ in 0..200 {
            if let Some(chunk) = port.try_recv() {
                return chunk;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no data from client");
    }

    async fn wait_attached(port: &SerialPort) {
        for _ in 0..200 {
            if port.is_client_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("client never attached");
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let mut port = SerialPort::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut client = TcpStream::connect(port.local_addr()).await.unwrap();
        wait_attached(&port).await;

        client.write_all(b"AT\r\n").await.unwrap();
        assert_eq!(recv_chunk(&mut port).await, b"AT\r\n");

        port.send(b"\r\nOK\r\n");
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"\r\nOK\r\n");
    }

    #[tokio::test]
    async fn test_output_dropped_without_client() {
        let port = SerialPort::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        port.send(b"lost");

        let mut client = TcpStream::connect(port.local_addr()).await.unwrap();
        wait_attached(&port).await;
        port.send(b"kept");

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"kept");
    }

    #[tokio::test]
    async fn test_next_client_after_disconnect() {
        let mut port = SerialPort::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let first = TcpStream::connect(port.local_addr()).await.unwrap();
        wait_attached(&port).await;
        drop(first);

        for _ in 0..200 {
            if !port.is_client_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut second = TcpStream::connect(port.local_addr()).await.unwrap();
        wait_attached(&port).await;
        second.write_all(b"ATE0\r\n").await.unwrap();
        assert_eq!(recv_chunk(&mut port).await, b"ATE0\r\n");
    }
}
