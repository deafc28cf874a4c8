//! Error and disconnect-reason types surfaced to the owner through the
//! `disconnected` callback.
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::wire::payload::PayloadError;
use crate::wire::FrameError;

/// A protocol-level violation: something the remote sent that this peer
/// will not tolerate. Always fatal to the connection.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed payload")]
    Payload(#[from] PayloadError),
    #[error("received message with invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("peer protocol version too old: {0}")]
    PeerProtocolVersion(u32),
    #[error("guard violated: {0}")]
    Guard(&'static str),
    #[error("pong nonce did not match the outstanding ping")]
    UnexpectedPong,
    #[error("received pong with no outstanding ping")]
    NoOutstandingPing,
    #[error("non-tx message arrived while a merkle block was incomplete")]
    IncompleteMerkleBlock,
}

/// The reason a peer connection was torn down.
#[derive(Error, Debug, Clone)]
pub enum DisconnectReason {
    /// The remote violated the protocol; fatal.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The underlying socket failed. Wrapped in `Arc` since [`io::Error`]
    /// isn't `Clone`.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),
    /// Either the connect attempt or `disconnectTime` expired.
    #[error("timed out")]
    TimedOut,
    /// The remote sent more of something than this peer accepts.
    #[error("excess: {0}")]
    Excess(&'static str),
    /// The owner explicitly requested disconnection.
    #[error("disconnected by command")]
    Command,
}

impl From<io::Error> for DisconnectReason {
    fn from(err: io::Error) -> Self {
        DisconnectReason::Transport(Arc::new(err))
    }
}
