//! The socket driver: a non-blocking connect with a deadline, and the
//! blocking read loop that owns the TCP stream's read half for the
//! lifetime of the connection.
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{error, info, warn};
use socket2::{Socket, TcpKeepalive};

use crate::callbacks::Callbacks;
use crate::collab::{HeaderValidator, MerkleBlockCodec, TransactionCodec};
use crate::config::PeerConfig;
use crate::dispatch::dispatch;
use crate::error::DisconnectReason;
use crate::state::{Deadline, SyncState};
use crate::sync::{Outbox, SyncContext};
use crate::wire::{self, HEADER_LEN};

/// Open a TCP connection with a bounded connect deadline. `SIGPIPE` is
/// already ignored by the Rust runtime on Unix, so a write to a
/// half-closed socket surfaces as an `io::Error` rather than killing the
/// process.
pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    enable_keepalive(stream)
}

/// Enable `SO_KEEPALIVE`, which `std` doesn't expose directly. Moves the
/// stream through a [`socket2::Socket`] and back rather than duplicating
/// the file descriptor.
fn enable_keepalive(stream: TcpStream) -> io::Result<TcpStream> {
    let socket = Socket::from(stream);
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))?;
    Ok(socket.into())
}

/// Commands the owner can inject into the receive thread. The receive
/// thread is the sole mutator of sync state, so even owner-initiated
/// actions are routed through this queue and executed on that thread
/// rather than reaching in directly.
pub enum PeerCommand {
    SendPing(Box<dyn FnOnce(bool) + Send>),
    LoadFilter(Vec<u8>),
    SendMempool,
    SendGetAddr,
    RerequestBlocks(crate::hash::Sha256d),
    Shutdown,
}

/// Shared write half: a socket write is atomic only at the kernel level,
/// so every sender assembles a full frame locally and writes it under
/// this lock in one pass.
pub type SharedWriter = Arc<Mutex<TcpStream>>;

fn send_frame(writer: &SharedWriter, magic: u32, command: [u8; 12], payload: &[u8]) -> io::Result<()> {
    let bytes = wire::encode(magic, command, payload);
    let mut stream = writer.lock().unwrap();
    stream.write_all(&bytes)
}

/// Drains any [`PeerCommand`]s waiting in the queue and applies them to
/// `state`/`out`, returning `true` if the owner asked to shut down.
fn drain_commands(
    commands: &Receiver<PeerCommand>,
    state: &mut SyncState,
    out: &mut Outbox,
) -> bool {
    while let Ok(cmd) = commands.try_recv() {
        match cmd {
            PeerCommand::SendPing(callback) => {
                let payload = crate::builders::ping(state);
                out.push(crate::wire::command::PING, payload);
                state.pong_callbacks.push_back(callback);
            }
            PeerCommand::LoadFilter(bytes) => {
                let payload = crate::builders::filterload(state, bytes);
                out.push(crate::wire::command::FILTERLOAD, payload);
            }
            PeerCommand::SendMempool => {
                let payload = crate::builders::mempool(state);
                out.push(crate::wire::command::MEMPOOL, payload);
            }
            PeerCommand::SendGetAddr => {
                let payload = crate::builders::getaddr(state);
                out.push(crate::wire::command::GETADDR, payload);
            }
            PeerCommand::RerequestBlocks(from_hash) => {
                rerequest_blocks(state, out, from_hash);
            }
            PeerCommand::Shutdown => return true,
        }
    }
    false
}

/// Discard every known block hash before `from_hash` and resend
/// `getdata` for what remains, per the outbound-builder spec for
/// `rerequestBlocks`. Also clears `needs_filter_update`, since the
/// replay this triggers is what that flag was deferring.
fn rerequest_blocks(state: &mut SyncState, out: &mut Outbox, from_hash: crate::hash::Sha256d) {
    if let Some(pos) = state.known_block_hashes.iter().position(|&h| h == from_hash) {
        state.known_block_hashes.drain(0..pos);
    }
    state.needs_filter_update = false;
    let remaining: Vec<crate::hash::Sha256d> = state.known_block_hashes.iter().copied().collect();
    let payload = crate::builders::getdata(state, &[], &remaining);
    out.push(crate::wire::command::GETDATA, payload);
}

/// Drive the receive loop until a fatal error, command, or the deadline
/// is reached. Owns `stream`'s read half for its entire lifetime; all
/// sends (including this function's own replies) go through `writer`.
#[allow(clippy::too_many_arguments)]
pub fn receive_loop(
    mut stream: TcpStream,
    writer: SharedWriter,
    magic: u32,
    mut state: SyncState,
    config: PeerConfig,
    callbacks: Callbacks,
    tx_codec: Arc<dyn TransactionCodec>,
    merkle_codec: Arc<dyn MerkleBlockCodec>,
    header_validator: Arc<dyn HeaderValidator>,
    commands: Receiver<PeerCommand>,
    deadline: Arc<Deadline>,
) {
    let _ = stream.set_read_timeout(Some(config.socket_timeout));
    let _ = stream.set_write_timeout(Some(config.socket_timeout));
    let _ = writer.lock().unwrap().set_write_timeout(Some(config.socket_timeout));
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut read_buf = [0u8; 4096];

    let reason = 'outer: loop {
        let mut out = Outbox::default();
        if drain_commands(&commands, &mut state, &mut out) {
            flush(&writer, magic, &mut out);
            break DisconnectReason::Command;
        }
        flush(&writer, magic, &mut out);

        if deadline.expired() {
            break DisconnectReason::TimedOut;
        }

        match stream.read(&mut read_buf) {
            Ok(0) => break DisconnectReason::Transport(Arc::new(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ))),
            Ok(n) => buf.extend_from_slice(&read_buf[..n]),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => break DisconnectReason::from(err),
        }

        loop {
            match wire::decode(&mut buf, magic) {
                Ok(None) => break,
                Ok(Some(frame)) => {
                    let mut out = Outbox::default();
                    let result = {
                        let mut ctx = SyncContext {
                            state: &mut state,
                            config: &config,
                            callbacks: &callbacks,
                            tx_codec: tx_codec.as_ref(),
                            merkle_codec: merkle_codec.as_ref(),
                            header_validator: header_validator.as_ref(),
                            out: &mut out,
                            deadline: &deadline,
                        };
                        dispatch(&mut ctx, &frame.command, &frame.payload)
                    };
                    flush(&writer, magic, &mut out);
                    if let Err(reason) = result {
                        break 'outer reason;
                    }
                }
                Err(err) => break 'outer DisconnectReason::Protocol(err.into()),
            }
        }

        if buf.len() < HEADER_LEN && buf.capacity() > 1 << 20 {
            buf.shrink_to_fit();
        }
    };

    if stream.shutdown(std::net::Shutdown::Both).is_err() {
        warn!(target: "peer", "socket already closed on disconnect");
    }
    state.fail_pong_callbacks();
    info!(target: "peer", "peer disconnected: {}", reason);
    (callbacks.disconnected)(&reason);
}

fn flush(writer: &SharedWriter, magic: u32, out: &mut Outbox) {
    for (command, payload) in out.drain() {
        if let Err(err) = send_frame(writer, magic, command, &payload) {
            error!(target: "peer", "send failed: {}", err);
        }
    }
}
