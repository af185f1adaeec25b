//! The runner end to end: a TCP client plays the host MCU.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use atmod_runner::{spawn_session, EngineFactory, RunnerProfile, SerialPort, SessionHandle};

struct Harness {
    _runtime: tokio::runtime::Runtime,
    session: SessionHandle,
    client: TcpStream,
    settings_path: PathBuf,
}

impl Harness {
    fn start(name: &str) -> Self {
        let settings_path = std::env::temp_dir().join(format!(
            "atmod-runner-{}-{}.bin",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&settings_path);

        let mut profile = RunnerProfile::default();
        profile.engine.echo = false;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let port = runtime
            .block_on(SerialPort::bind("127.0.0.1:0".parse().unwrap()))
            .unwrap();
        let addr = port.local_addr();

        let session = spawn_session(
            EngineFactory {
                profile,
                settings_path: settings_path.clone(),
            },
            port,
        )
        .unwrap();

        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let mut harness = Harness {
            _runtime: runtime,
            session,
            client,
            settings_path,
        };
        // Wait until the bridge forwards replies to this client.
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if harness.command("AT\r\n", "OK\r\n").contains("OK") {
                break;
            }
        }
        harness
    }

    /// Send `line` and read until the reply ends with `terminator`.
    fn command(&mut self, line: &str, terminator: &str) -> String {
        self.client.write_all(line.as_bytes()).unwrap();
        self.read_until(terminator)
    }

    fn read_until(&mut self, terminator: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut reply = Vec::new();
        let mut buf = [0u8; 512];
        while Instant::now() < deadline && !reply.ends_with(terminator.as_bytes()) {
            match self.client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => reply.extend_from_slice(&buf[..n]),
                Err(_) => continue,
            }
        }
        String::from_utf8_lossy(&reply).into_owned()
    }

    fn stop(self) -> u32 {
        self.session.shutdown();
        let restarts = self.session.join().unwrap();
        let _ = std::fs::remove_file(&self.settings_path);
        restarts
    }
}

#[test]
fn test_basic_command_over_tcp() {
    let mut harness = Harness::start("basic");
    assert_eq!(harness.command("AT\r\n", "OK\r\n"), "\r\nOK\r\n");
    assert_eq!(
        harness.command("AT+CIPMUX?\r\n", "OK\r\n"),
        "+CIPMUX:0\r\n\r\nOK\r\n"
    );
    assert_eq!(harness.stop(), 0);
}

#[test]
fn test_restart_persists_settings() {
    let mut harness = Harness::start("restart");
    assert_eq!(
        harness.command("AT+CIPSSLCERTMAX=4\r\n", "OK\r\n"),
        "\r\nOK\r\n"
    );
    assert_eq!(harness.command("AT+RST\r\n", "OK\r\n"), "\r\nOK\r\n");
    assert!(harness.settings_path.exists());

    assert_eq!(
        harness.command("AT+CIPSSLCERTMAX?\r\n", "OK\r\n"),
        "+CIPSSLCERTMAX:4\r\nOK\r\n"
    );
    assert_eq!(harness.stop(), 1);
}

#[test]
fn test_tcp_link_to_local_server() {
    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let server_port = server.local_addr().unwrap().port();
    let mut harness = Harness::start("link");

    let line = format!("AT+CIPSTART=\"TCP\",\"127.0.0.1\",{}\r\n", server_port);
    assert_eq!(harness.command(&line, "OK\r\n"), "CONNECT\r\n\r\nOK\r\n");
    let (mut peer, _) = server.accept().unwrap();

    assert_eq!(harness.command("AT+CIPSEND=4\r\n", "> "), "OK\r\n> ");
    assert_eq!(
        harness.command("ping", "SEND OK\r\n"),
        "\r\nRecv 4 bytes\r\n\r\nSEND OK\r\n"
    );
    let mut received = [0u8; 4];
    peer.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"ping");

    peer.write_all(b"pong").unwrap();
    assert_eq!(harness.read_until("pong"), "\r\n+IPD,4:pong");

    drop(peer);
    assert_eq!(harness.read_until("CLOSED\r\n"), "CLOSED\r\n");
    harness.stop();
}

#[test]
fn test_tls_link_refused_on_host() {
    let mut harness = Harness::start("tls");
    assert_eq!(
        harness.command("AT+CIPSSLSIZE=4096\r\n", "OK\r\n"),
        "\r\nOK\r\n"
    );
    assert_eq!(
        harness.command(
            "AT+CIPSTART=\"SSL\",\"127.0.0.1\",443\r\n",
            "CLOSED\r\n"
        ),
        "connect fail\r\n\r\nERROR\r\nCLOSED\r\n"
    );
    harness.stop();
}
