//! End-to-end tests driving the real socket/dispatch stack over a
//! loopback TCP pair, rather than unit-testing handlers in isolation.
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nakamoto_common::network::Network;
use nakamoto_peer::wire::command;
use nakamoto_peer::wire::payload::{encode_version, VersionMessage};
use nakamoto_peer::{Callbacks, Peer, PeerConfig};

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn read_frame(stream: &mut TcpStream) -> ([u8; 12], Vec<u8>) {
    let mut header = [0u8; 24];
    stream.read_exact(&mut header).unwrap();
    let mut command = [0u8; 12];
    command.copy_from_slice(&header[4..16]);
    let len = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    (command, payload)
}

fn write_frame(stream: &mut TcpStream, magic: u32, command: [u8; 12], payload: &[u8]) {
    let bytes = nakamoto_peer::wire::encode(magic, command, payload);
    stream.write_all(&bytes).unwrap();
}

fn remote_version_payload() -> Vec<u8> {
    encode_version(&VersionMessage {
        protocol_version: 70002,
        services: 1,
        timestamp: 0,
        addr_recv_services: 0,
        addr_recv_ip: [0; 16],
        addr_recv_port: 0,
        addr_from_services: 0,
        addr_from_ip: [0; 16],
        addr_from_port: 8333,
        nonce: 1,
        user_agent: "/test:0.1/".to_string(),
        start_height: 100,
        relay: true,
    })
}

/// The full handshake: our `version` goes out before the receive thread
/// even starts, the fake remote answers `verack` then sends its own
/// `version`/`verack`, and `connected` must fire exactly once.
#[test]
fn handshake_completes_and_fires_connected() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let magic = Network::Mainnet.magic();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let (cmd, _payload) = read_frame(&mut stream);
        assert_eq!(cmd, command::VERSION);

        write_frame(&mut stream, magic, command::VERSION, &remote_version_payload());
        write_frame(&mut stream, magic, command::VERACK, &[]);

        let (cmd, _) = read_frame(&mut stream);
        assert_eq!(cmd, command::VERACK);
        stream
    });

    let connected = Arc::new(AtomicBool::new(false));
    let connected_clone = connected.clone();
    let mut callbacks = Callbacks::default();
    callbacks.connected = Arc::new(move || {
        connected_clone.store(true, Ordering::SeqCst);
    });

    let config = PeerConfig::new(Network::Mainnet);
    let peer = Peer::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port, config).with_callbacks(callbacks);
    peer.connect().unwrap();

    assert!(wait_until(Duration::from_secs(5), || connected.load(Ordering::SeqCst)));
    assert!(peer.is_connected());

    peer.disconnect();
    peer.join();
    server.join().unwrap();
}

/// An unsolicited, malformed `headers` message (empty) must disconnect
/// the peer rather than be silently ignored.
#[test]
fn empty_headers_message_disconnects() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let magic = Network::Mainnet.magic();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let (_cmd, _payload) = read_frame(&mut stream);
        write_frame(&mut stream, magic, command::VERSION, &remote_version_payload());
        write_frame(&mut stream, magic, command::VERACK, &[]);
        let _ = read_frame(&mut stream);
        // Zero-count headers payload: just the varint `0`.
        write_frame(&mut stream, magic, command::HEADERS, &[0u8]);
    });

    let disconnected = Arc::new(Mutex::new(None));
    let disconnected_clone = disconnected.clone();
    let mut callbacks = Callbacks::default();
    callbacks.disconnected = Arc::new(move |reason| {
        *disconnected_clone.lock().unwrap() = Some(reason.to_string());
    });

    let config = PeerConfig::new(Network::Mainnet);
    let peer = Peer::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port, config).with_callbacks(callbacks);
    peer.connect().unwrap();

    assert!(wait_until(Duration::from_secs(5), || disconnected.lock().unwrap().is_some()));
    peer.join();
    server.join().unwrap();
}
