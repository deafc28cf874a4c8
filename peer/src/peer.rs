//! The public `Peer` handle. Internally this is a thin, clonable view
//! over shared connection state plus a command channel into the
//! receive thread that owns it — the "super-struct embedding a public
//! projection" pattern, represented here as a plain opaque handle
//! rather than any inheritance trick.
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Sender};
use log::info;

use crate::callbacks::Callbacks;
use crate::collab::{HeaderValidator, MerkleBlockCodec, NullCollaborator, TransactionCodec};
use crate::config::PeerConfig;
use crate::error::DisconnectReason;
use crate::hash::Sha256d;
use crate::socket::{self, PeerCommand, SharedWriter};
use crate::state::{ConnectionState, Deadline, SyncState};

/// A single-peer SPV connection. Cheap to clone: clones share the same
/// underlying connection.
#[derive(Clone)]
pub struct Peer {
    addr: IpAddr,
    port: u16,
    config: PeerConfig,
    callbacks: Callbacks,
    tx_codec: Arc<dyn TransactionCodec>,
    merkle_codec: Arc<dyn MerkleBlockCodec>,
    header_validator: Arc<dyn HeaderValidator>,
    inner: Arc<Inner>,
}

struct Inner {
    connected: AtomicBool,
    deadline: Arc<Deadline>,
    commands: Mutex<Option<Sender<PeerCommand>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Construct a peer bound to `addr:port`, not yet connected.
    pub fn new(addr: IpAddr, port: u16, config: PeerConfig) -> Self {
        Self {
            addr,
            port,
            config,
            callbacks: Callbacks::default(),
            tx_codec: Arc::new(NullCollaborator),
            merkle_codec: Arc::new(NullCollaborator),
            header_validator: Arc::new(NullCollaborator),
            inner: Arc::new(Inner {
                connected: AtomicBool::new(false),
                deadline: Arc::new(Deadline::disabled()),
                commands: Mutex::new(None),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Install owner callbacks. Must be called before [`Peer::connect`].
    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Install the transaction/merkle-block/header collaborators. Must
    /// be called before [`Peer::connect`].
    pub fn with_collaborators(
        mut self,
        tx_codec: Arc<dyn TransactionCodec>,
        merkle_codec: Arc<dyn MerkleBlockCodec>,
        header_validator: Arc<dyn HeaderValidator>,
    ) -> Self {
        self.tx_codec = tx_codec;
        self.merkle_codec = merkle_codec;
        self.header_validator = header_validator;
        self
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Connect with a bounded deadline, then spawn the receive thread
    /// that owns this connection from here on. Blocks for at most
    /// `config.connect_timeout`.
    pub fn connect(&self) -> Result<(), DisconnectReason> {
        if !(self.callbacks.network_is_reachable)() {
            return Err(DisconnectReason::TimedOut);
        }

        let socket_addr = SocketAddr::new(self.addr, self.port);
        let stream = socket::connect(socket_addr, self.config.connect_timeout).map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                DisconnectReason::TimedOut
            } else {
                DisconnectReason::from(err)
            }
        })?;

        let write_half = stream.try_clone()?;
        let writer: SharedWriter = Arc::new(Mutex::new(write_half));

        let (tx, rx) = unbounded();
        *self.inner.commands.lock().unwrap() = Some(tx);

        let mut state = SyncState::new(self.addr, self.port, self.config.earliest_key_time);
        state.connection_state = ConnectionState::Connecting;

        let nonce = state.nonce;
        let version_payload = crate::builders::version(
            self.config.protocol_version,
            &self.config.user_agent,
            nonce,
            0,
            self.addr,
            self.port,
        );
        // Stamped immediately before the version goes out, so a verack
        // with no ping in between still yields a meaningful round-trip
        // time for `ping_time`.
        state.start_time = Some(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs(),
        );
        {
            use std::io::Write;
            let bytes = crate::wire::encode(
                self.config.network.magic(),
                crate::wire::command::VERSION,
                &version_payload,
            );
            writer.lock().unwrap().write_all(&bytes)?;
        }

        let magic = self.config.network.magic();
        let config = self.config.clone();
        let callbacks = self.callbacks.clone();
        let tx_codec = self.tx_codec.clone();
        let merkle_codec = self.merkle_codec.clone();
        let header_validator = self.header_validator.clone();
        let deadline = self.inner.deadline.clone();
        let inner = self.inner.clone();

        let handle = thread::Builder::new()
            .name(format!("peer-{}:{}", self.addr, self.port))
            .spawn(move || {
                inner.connected.store(true, Ordering::Relaxed);
                socket::receive_loop(
                    stream,
                    writer,
                    magic,
                    state,
                    config,
                    callbacks,
                    tx_codec,
                    merkle_codec,
                    header_validator,
                    rx,
                    deadline,
                );
                inner.connected.store(false, Ordering::Relaxed);
            })
            .expect("failed to spawn peer receive thread");

        *self.inner.thread.lock().unwrap() = Some(handle);
        info!(target: "peer", "connecting to {}:{}", self.addr, self.port);
        Ok(())
    }

    fn send_command(&self, cmd: PeerCommand) {
        if let Some(sender) = self.inner.commands.lock().unwrap().as_ref() {
            let _ = sender.send(cmd);
        }
    }

    /// Enqueue a `ping`; `callback` fires with `true` on the matching
    /// `pong`, `false` if the connection drops first. The ping payload
    /// is always the peer's own nonce, set once at handshake time, so
    /// no nonce is passed in here.
    pub fn ping(&self, callback: impl FnOnce(bool) + Send + 'static) {
        self.send_command(PeerCommand::SendPing(Box::new(callback)));
    }

    /// Send a bloom filter to the remote, gating future `merkleblock`
    /// acceptance.
    pub fn load_filter(&self, filter_bytes: Vec<u8>) {
        self.send_command(PeerCommand::LoadFilter(filter_bytes));
    }

    pub fn send_mempool(&self) {
        self.send_command(PeerCommand::SendMempool);
    }

    pub fn send_getaddr(&self) {
        self.send_command(PeerCommand::SendGetAddr);
    }

    /// Re-request blocks from `from_hash` onward, e.g. after a bloom
    /// filter update that may match transactions already skipped.
    pub fn rerequest_blocks(&self, from_hash: Sha256d) {
        self.send_command(PeerCommand::RerequestBlocks(from_hash));
    }

    /// Schedule a graceful disconnect in `seconds`.
    pub fn set_disconnect_time(&self, seconds: u64) {
        self.inner.deadline.set_in(seconds);
    }

    /// Disconnect immediately; the receive thread observes this on its
    /// next wake and exits, draining pong callbacks with failure.
    pub fn disconnect(&self) {
        self.send_command(PeerCommand::Shutdown);
    }

    /// Block until the receive thread exits.
    pub fn join(&self) {
        if let Some(handle) = self.inner.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
