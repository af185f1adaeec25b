//! End-to-end serial sessions against mock collaborators.
//!
//! Each test drives a fresh engine purely through bytes on the serial line
//! and checks what comes back, the way a host MCU would see it.

use std::net::Ipv4Addr;

use atmod_engine::mock::{certificate_with_cn, mock_platform, MockConnection, MockHandles};
use atmod_engine::{Engine, EngineConfig, SerialMode};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

fn connected_engine() -> (Engine, MockHandles) {
    let (platform, handles) = mock_platform();
    handles
        .wifi
        .borrow_mut()
        .associate("lab", Ipv4Addr::new(10, 0, 0, 20));
    let config = EngineConfig {
        echo: false,
        ..EngineConfig::default()
    };
    (Engine::new(platform, config), handles)
}

fn run(engine: &mut Engine, input: &[u8]) -> String {
    engine.feed(input);
    String::from_utf8_lossy(&engine.take_output()).into_owned()
}

fn pem(der: &[u8]) -> String {
    let body = BASE64_STANDARD.encode(der);
    let mut text = String::from("-----BEGIN CERTIFICATE-----\r\n");
    for line in body.as_bytes().chunks(64) {
        text.push_str(&String::from_utf8_lossy(line));
        text.push_str("\r\n");
    }
    text.push_str("-----END CERTIFICATE-----");
    text
}

// ============================================================================
// Certificates
// ============================================================================

#[test]
fn test_certificate_load_and_query() {
    let (mut engine, _) = connected_engine();
    let text = pem(&certificate_with_cn("Session Root CA", 200));

    assert_eq!(run(&mut engine, b"AT+CIPSSLCERT\r\n"), "\r\nOK\r\n>");
    assert!(matches!(engine.mode(), SerialMode::CertLoad(_)));

    assert_eq!(
        run(&mut engine, text.as_bytes()),
        format!("Read {} bytes\r\n\r\nOK\r\n", text.len())
    );
    assert!(engine.mode().is_command());

    assert_eq!(
        run(&mut engine, b"AT+CIPSSLCERT?\r\n"),
        "+CIPSSLCERT,1:Session Root CA\r\n\r\nOK\r\n"
    );
}

#[test]
fn test_certificate_duplicate_rejected() {
    let (mut engine, _) = connected_engine();
    let text = pem(&certificate_with_cn("Twice", 40));

    run(&mut engine, b"AT+CIPSSLCERT\r\n");
    run(&mut engine, text.as_bytes());
    run(&mut engine, b"AT+CIPSSLCERT\r\n");
    assert_eq!(
        run(&mut engine, text.as_bytes()),
        format!(
            "Read {} bytes\r\nCertificate already loaded as 1\r\n\r\nERROR\r\n",
            text.len()
        )
    );
    assert_eq!(engine.certificates().len(), 1);
}

#[test]
fn test_certificate_illegal_byte_aborts_load() {
    let (mut engine, _) = connected_engine();
    run(&mut engine, b"AT+CIPSSLCERT\r\n");

    // The rest of the line after the bad byte is dropped.
    assert_eq!(
        run(&mut engine, b"-----BEGIN CERT*IFICATE-----\r\nAT\r\n"),
        "\r\nERROR\r\n\r\nOK\r\n"
    );
    assert!(engine.mode().is_command());
    assert!(engine.certificates().is_empty());
}

#[test]
fn test_chain_auth_after_load() {
    let (mut engine, handles) = connected_engine();
    let text = pem(&certificate_with_cn("Anchor", 10));
    run(&mut engine, b"AT+CIPSSLCERT\r\n");
    run(&mut engine, text.as_bytes());

    assert_eq!(run(&mut engine, b"AT+CIPSSLAUTH=2\r\n"), "\r\nOK\r\n");
    assert_eq!(run(&mut engine, b"AT+CIPSSLSIZE=4096\r\n"), "\r\nOK\r\n");
    assert_eq!(
        run(&mut engine, b"AT+CIPSTART=\"SSL\",\"secure.example\",443\r\n"),
        "CONNECT\r\n\r\nOK\r\n"
    );

    let record = handles.net.borrow().connects[0].clone();
    assert_eq!(record.trust, "anchors:1");
    assert_eq!(record.buffer_size, 4096);
}

// ============================================================================
// Links
// ============================================================================

#[test]
fn test_send_writes_payload_once() {
    let (mut engine, handles) = connected_engine();
    run(&mut engine, b"AT+CIPSTART=\"TCP\",\"10.0.0.1\",7\r\n");

    assert_eq!(run(&mut engine, b"AT+CIPSEND=3\r\n"), "OK\r\n> ");
    // Payload bytes are never taken for a command, even CR/LF.
    assert_eq!(
        run(&mut engine, b"\r\nA"),
        "\r\nRecv 3 bytes\r\n\r\nSEND OK\r\n"
    );
    assert!(engine.mode().is_command());

    let connection = handles.net.borrow().opened[0].clone();
    assert_eq!(connection.borrow().writes, vec![b"\r\nA".to_vec()]);

    // Back in command mode straight away.
    assert_eq!(run(&mut engine, b"AT\r\n"), "\r\nOK\r\n");
}

#[test]
fn test_large_send_is_chunked() {
    let (mut engine, handles) = connected_engine();
    run(&mut engine, b"AT+CIPSTART=\"TCP\",\"10.0.0.1\",7\r\n");

    let payload = vec![0x42u8; 1300];
    run(&mut engine, b"AT+CIPSEND=1300\r\n");
    assert_eq!(
        run(&mut engine, &payload),
        "\r\nRecv 1300 bytes\r\n\r\nSEND OK\r\n"
    );

    let connection = handles.net.borrow().opened[0].clone();
    let sizes: Vec<usize> = connection.borrow().writes.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![512, 512, 276]);
    assert_eq!(connection.borrow().written(), payload);
}

#[test]
fn test_five_links_then_full() {
    let (mut engine, _) = connected_engine();
    run(&mut engine, b"AT+CIPMUX=1\r\n");

    for id in 0..5 {
        let line = format!("AT+CIPSTART={},\"TCP\",\"10.0.0.1\",{}\r\n", id, 8000 + id);
        assert_eq!(
            run(&mut engine, line.as_bytes()),
            format!("{},CONNECT\r\n\r\nOK\r\n", id)
        );
    }
    assert_eq!(engine.links().links().count(), 5);

    assert_eq!(run(&mut engine, b"AT+CIPCLOSE=2\r\n"), "2,CLOSED\r\n\r\nOK\r\n");
    assert_eq!(
        run(&mut engine, b"AT+CIPSTART=2,\"TCP\",\"10.0.0.1\",9000\r\n"),
        "2,CONNECT\r\n\r\nOK\r\n"
    );
}

#[test]
fn test_inbound_data_forwarded() {
    let (mut engine, handles) = connected_engine();
    run(&mut engine, b"AT+CIPMUX=1\r\n");
    run(&mut engine, b"AT+CIPDINFO=1\r\n");
    run(&mut engine, b"AT+CIPSTART=1,\"TCP\",\"10.0.0.1\",80\r\n");

    let connection = handles.net.borrow().opened[0].clone();
    connection.borrow_mut().inbound.extend(b"pong".iter().copied());
    engine.poll();
    assert_eq!(
        &engine.take_output()[..],
        b"\r\n+IPD,1,4,192.168.1.10,80:pong"
    );

    connection.borrow_mut().connected = false;
    engine.poll();
    assert_eq!(&engine.take_output()[..], b"1,CLOSED\r\n");
    assert!(engine.links().get(1).is_none());
}

#[test]
fn test_server_accepts_up_to_limit() {
    let (mut engine, handles) = connected_engine();
    run(&mut engine, b"AT+CIPMUX=1\r\n");
    run(&mut engine, b"AT+CIPSERVERMAXCONN=2\r\n");
    assert_eq!(run(&mut engine, b"AT+CIPSERVER=1,8080\r\n"), "\r\nOK\r\n");

    for _ in 0..3 {
        handles
            .net
            .borrow_mut()
            .pending_peers
            .push_back(MockConnection::new());
    }
    engine.poll();
    assert_eq!(&engine.take_output()[..], b"0,CONNECT\r\n1,CONNECT\r\n");
    assert_eq!(handles.net.borrow().pending_peers.len(), 1);
}

#[test]
fn test_server_link_idle_timeout() {
    let (mut engine, handles) = connected_engine();
    run(&mut engine, b"AT+CIPMUX=1\r\n");
    run(&mut engine, b"AT+CIPSTO=10\r\n");
    run(&mut engine, b"AT+CIPSERVER=1\r\n");

    handles
        .net
        .borrow_mut()
        .pending_peers
        .push_back(MockConnection::new());
    engine.poll();
    engine.take_output();

    handles.clock.borrow_mut().advance(10_001);
    engine.poll();
    assert_eq!(&engine.take_output()[..], b"0,CLOSED\r\n");
}

// ============================================================================
// Deferred operations
// ============================================================================

#[test]
fn test_commands_busy_during_join() {
    let (platform, handles) = mock_platform();
    let mut engine = Engine::new(
        platform,
        EngineConfig {
            echo: false,
            ..EngineConfig::default()
        },
    );

    assert_eq!(run(&mut engine, b"AT+CWJAP=\"lab\",\"secret\"\r\n"), "");
    assert_eq!(run(&mut engine, b"AT\r\n"), "busy p...\r\n");

    handles
        .wifi
        .borrow_mut()
        .join_script
        .push_back(atmod_engine::platform::JoinStatus::Connected);
    engine.poll();
    assert_eq!(&engine.take_output()[..], b"\r\nOK\r\n");
    assert_eq!(run(&mut engine, b"AT\r\n"), "\r\nOK\r\n");
}

#[test]
fn test_settings_survive_restart() {
    let (platform, handles) = mock_platform();
    let mut engine = Engine::new(platform, EngineConfig::default());
    engine.feed(b"AT+UART_DEF=9600,8,1,0,0\r\nAT+CIPSSLCERTMAX=3\r\nAT+RST\r\n");
    assert!(engine.restart_requested());

    let block = handles.storage.borrow().block.clone();
    let (platform, handles) = mock_platform();
    handles.storage.borrow_mut().block = block;
    let engine = Engine::new(platform, EngineConfig::default());

    assert_eq!(engine.settings().uart_baud, 9600);
    assert_eq!(engine.certificates().capacity(), 3);
    assert_eq!(handles.system.borrow().uart.map(|(baud, _)| baud), Some(9600));
}
