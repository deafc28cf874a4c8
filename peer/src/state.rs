//! Peer connection and sync state: the data [`crate::sync`]'s handlers
//! read and mutate. Per the concurrency contract, only the receive
//! thread ever touches a live [`SyncState`].
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hash::Sha256d;

/// Maximum retained entries in `known_block_hashes` before trimming.
pub const MAX_KNOWN_BLOCK_HASHES: usize = 50_000;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// The disconnect deadline, settable from any thread without going
/// through the command queue: `disconnect()` and `set_disconnect_time`
/// just need to nudge a number the receive loop polls every wake, they
/// don't need to serialize with state mutation. `u64::MAX` means
/// disabled (`+∞`).
pub struct Deadline(AtomicU64);

impl Deadline {
    pub fn disabled() -> Self {
        Deadline(AtomicU64::new(u64::MAX))
    }

    pub fn set_in(&self, seconds: u64) {
        self.0.store(now_secs() + seconds, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(u64::MAX, Ordering::SeqCst);
    }

    pub fn expired(&self) -> bool {
        now_secs() >= self.0.load(Ordering::SeqCst)
    }
}

/// The peer's connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A merkle block delivered but still missing some of its referenced
/// transactions.
#[derive(Debug, Clone)]
pub struct PendingMerkleBlock {
    pub header: [u8; 80],
    /// Hashes this block claims to contain that haven't arrived as `tx`
    /// messages yet.
    pub outstanding: HashSet<Sha256d>,
}

/// A queued pong callback: fired with `true` when the matching `pong`
/// arrives, or `false` if the connection drops first.
pub type PongCallback = Box<dyn FnOnce(bool) + Send>;

/// Identity and handshake fields plus the full SPV sync state for one
/// peer connection.
pub struct SyncState {
    // Identity.
    pub addr: IpAddr,
    pub port: u16,
    pub services: u64,
    pub last_seen: u64,

    // Connection lifecycle.
    pub connection_state: ConnectionState,
    pub nonce: u64,

    // Handshake fields.
    pub remote_version: u32,
    pub remote_user_agent: String,
    pub remote_height: u32,

    // Latency.
    pub start_time: Option<u64>,
    pub ping_time: f64,

    // Sync state.
    pub earliest_key_time: u64,
    pub current_block_height: u32,
    pub last_block_hash: Option<Sha256d>,
    pub current_block: Option<PendingMerkleBlock>,
    pub known_block_hashes: VecDeque<Sha256d>,
    pub known_tx_hashes: Vec<Sha256d>,
    pub known_tx_hash_set: HashSet<Sha256d>,

    // Flags.
    pub sent_verack: bool,
    pub got_verack: bool,
    pub sent_getaddr: bool,
    pub sent_filter: bool,
    pub sent_getdata: bool,
    pub sent_mempool: bool,
    pub sent_getblocks: bool,
    pub needs_filter_update: bool,
    pub waiting_for_network: bool,

    // FIFO pong callbacks, one per outstanding `ping`.
    pub pong_callbacks: VecDeque<PongCallback>,
}

impl SyncState {
    pub fn new(addr: IpAddr, port: u16, earliest_key_time: u64) -> Self {
        Self {
            addr,
            port,
            services: 0,
            last_seen: 0,
            connection_state: ConnectionState::Disconnected,
            nonce: fastrand::u64(..),
            remote_version: 0,
            remote_user_agent: String::new(),
            remote_height: 0,
            start_time: None,
            ping_time: 0.0,
            earliest_key_time,
            current_block_height: 0,
            last_block_hash: None,
            current_block: None,
            known_block_hashes: VecDeque::new(),
            known_tx_hashes: Vec::new(),
            known_tx_hash_set: HashSet::new(),
            sent_verack: false,
            got_verack: false,
            sent_getaddr: false,
            sent_filter: false,
            sent_getdata: false,
            sent_mempool: false,
            sent_getblocks: false,
            needs_filter_update: false,
            waiting_for_network: false,
            pong_callbacks: VecDeque::new(),
        }
    }

    /// Record a newly observed block hash, trimming the oldest third
    /// once the bound is exceeded (invariant: `|known_block_hashes| <=
    /// MAX_KNOWN_BLOCK_HASHES` after every mutation).
    pub fn remember_block_hash(&mut self, hash: Sha256d) {
        self.known_block_hashes.push_back(hash);
        if self.known_block_hashes.len() > MAX_KNOWN_BLOCK_HASHES {
            let drop = self.known_block_hashes.len() / 3;
            self.known_block_hashes.drain(0..drop);
        }
    }

    /// Record a newly observed tx hash. Returns `false` if it was
    /// already known (invariant: set membership == sequence membership).
    pub fn remember_tx_hash(&mut self, hash: Sha256d) -> bool {
        if self.known_tx_hash_set.insert(hash) {
            self.known_tx_hashes.push(hash);
            true
        } else {
            false
        }
    }

    /// Transition to `Connected` once both verack flags are set
    /// (invariant 1). The caller is responsible for disabling the
    /// disconnect deadline, since that lives in the cross-thread
    /// [`Deadline`], not here.
    pub fn maybe_complete_handshake(&mut self) -> bool {
        if self.sent_verack && self.got_verack {
            self.connection_state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Drain all outstanding pong callbacks with a failure indication,
    /// e.g. on disconnect.
    pub fn fail_pong_callbacks(&mut self) {
        for callback in self.pong_callbacks.drain(..) {
            callback(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn state() -> SyncState {
        SyncState::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333, 0)
    }

    #[test]
    fn block_hash_log_trims_oldest_third() {
        let mut s = state();
        for i in 0..MAX_KNOWN_BLOCK_HASHES + 1 {
            let mut bytes = [0u8; 32];
            bytes[0..8].copy_from_slice(&(i as u64).to_le_bytes());
            s.remember_block_hash(Sha256d(bytes));
        }
        assert!(s.known_block_hashes.len() <= MAX_KNOWN_BLOCK_HASHES);
    }

    #[test]
    fn tx_hash_set_matches_sequence() {
        let mut s = state();
        let h1 = Sha256d([1; 32]);
        let h2 = Sha256d([2; 32]);
        assert!(s.remember_tx_hash(h1));
        assert!(s.remember_tx_hash(h2));
        assert!(!s.remember_tx_hash(h1));
        assert_eq!(s.known_tx_hashes.len(), s.known_tx_hash_set.len());
        assert!(s.known_tx_hashes.iter().all(|h| s.known_tx_hash_set.contains(h)));
    }

    #[test]
    fn connected_iff_both_veracks() {
        let mut s = state();
        assert!(!s.maybe_complete_handshake());
        s.sent_verack = true;
        assert!(!s.maybe_complete_handshake());
        s.got_verack = true;
        assert!(s.maybe_complete_handshake());
        assert!(s.is_connected());
    }
}
