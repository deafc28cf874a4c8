//! The owner-supplied hooks the receive thread calls out to. Modeled as a
//! configuration record of function references rather than a trait with
//! dynamic dispatch, per the "callbacks need not be a class hierarchy"
//! design note: a plain struct of `Arc<dyn Fn>` fields is enough.
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::DisconnectReason;
use crate::hash::Sha256d;
use crate::wire::payload::AddrEntry;

/// Owner hooks fired from the receive thread. Every field defaults to a
/// no-op, so callers only set the ones they care about.
#[derive(Clone)]
pub struct Callbacks {
    /// The handshake completed (`sentVerack && gotVerack`).
    pub connected: Arc<dyn Fn() + Send + Sync>,
    /// The connection was torn down.
    pub disconnected: Arc<dyn Fn(&DisconnectReason) + Send + Sync>,
    /// An `addr` message carrying peer addresses arrived.
    pub relayed_peers: Arc<dyn Fn(&[AddrEntry]) + Send + Sync>,
    /// A `tx` message was relayed and matched our interest.
    pub relayed_tx: Arc<dyn Fn(&[u8]) + Send + Sync>,
    /// A transaction hash was newly observed in an `inv`.
    pub has_tx: Arc<dyn Fn(Sha256d) + Send + Sync>,
    /// The remote rejected a transaction we sent.
    pub rejected_tx: Arc<dyn Fn(Sha256d, u8) + Send + Sync>,
    /// A validated block (header, or completed merkle block) is ready.
    pub relayed_block: Arc<dyn Fn(&[u8]) + Send + Sync>,
    /// The remote replied `notfound` to one of our requests.
    pub notfound: Arc<dyn Fn(&[Sha256d], &[Sha256d]) + Send + Sync>,
    /// The remote asked for one of our own transactions by hash.
    pub requested_tx: Arc<dyn Fn(Sha256d) -> Option<Vec<u8>> + Send + Sync>,
    /// Queried before connecting; lets the owner hold off while offline.
    pub network_is_reachable: Arc<dyn Fn() -> bool + Send + Sync>,
    /// The peer address this set of callbacks is bound to, for logging.
    pub addr: Option<SocketAddr>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            connected: Arc::new(|| {}),
            disconnected: Arc::new(|_| {}),
            relayed_peers: Arc::new(|_| {}),
            relayed_tx: Arc::new(|_| {}),
            has_tx: Arc::new(|_| {}),
            rejected_tx: Arc::new(|_, _| {}),
            relayed_block: Arc::new(|_| {}),
            notfound: Arc::new(|_, _| {}),
            requested_tx: Arc::new(|_| None),
            network_is_reachable: Arc::new(|| true),
            addr: None,
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}
