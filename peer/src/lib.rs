//! A single-peer Bitcoin-style SPV connection: framed wire protocol,
//! version handshake, and a bloom-filtered, merkle-proof chain sync
//! state machine, all driven from one dedicated receive thread per
//! peer.
//!
//! What this crate does *not* do: parse or validate transactions and
//! blocks, construct bloom filters, or coordinate multiple peers. Those
//! are supplied by the embedder through [`collab`] and [`callbacks`].

pub mod builders;
pub mod callbacks;
pub mod collab;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod peer;
pub mod socket;
pub mod state;
pub mod sync;
pub mod wire;

pub use callbacks::Callbacks;
pub use collab::{HeaderValidator, MerkleBlockCodec, NullCollaborator, TransactionCodec};
pub use config::PeerConfig;
pub use error::{DisconnectReason, ProtocolError};
pub use hash::Sha256d;
pub use peer::Peer;
