//! External collaborators: parsing, validation, and hashing the core
//! deliberately does not own. A wallet's bloom filter, a transaction
//! codec, and a Merkle-proof validator are domain logic the core only
//! needs to call through, never reimplement.
use crate::hash::Sha256d;

/// Parses and hashes raw `tx` payload bytes. The core never interprets a
/// transaction's structure; it only needs a hash to track delivery
/// against a pending merkle block, and a yes/no on whether the bytes
/// parsed at all.
pub trait TransactionCodec: Send + Sync {
    /// Parse raw transaction bytes, or report they don't parse.
    fn parse(&self, bytes: &[u8]) -> Option<Sha256d>;
}

/// Parses and validates `merkleblock` payload bytes. Returns the set of
/// transaction hashes the partial Merkle tree claims are included, which
/// the sync state machine then waits to see arrive as `tx` messages.
pub trait MerkleBlockCodec: Send + Sync {
    /// Parse a `merkleblock` payload, or report it doesn't parse.
    fn parse(&self, bytes: &[u8]) -> Option<ParsedMerkleBlock>;

    /// Validate proof-of-work and timestamp sanity against the time the
    /// block was received.
    fn is_valid(&self, block: &ParsedMerkleBlock, now: u64) -> bool;
}

/// A merkle block that has passed [`MerkleBlockCodec::parse`].
#[derive(Debug, Clone)]
pub struct ParsedMerkleBlock {
    /// The 80-byte block header this proof is attached to.
    pub header: [u8; 80],
    /// Transaction hashes the partial Merkle tree claims match the
    /// filter.
    pub tx_hashes: Vec<Sha256d>,
}

/// Validates headers delivered in a `headers` message: proof-of-work and
/// timestamp sanity. Full chain validation (difficulty retargeting,
/// checkpoints) lives one layer up, in the chain tree this core never
/// holds.
pub trait HeaderValidator: Send + Sync {
    /// `now` is the wall-clock time the header was received, as the
    /// original header-timestamp sanity check is relative to arrival
    /// time, not a stored chain tip.
    fn validate(&self, header: &[u8; 80], now: u64) -> bool;
}

/// A permissive stand-in useful for tests and for embedders that don't
/// need transaction or merkle-block relay: transactions and merkle
/// blocks never parse, and every header is accepted.
pub struct NullCollaborator;

impl TransactionCodec for NullCollaborator {
    fn parse(&self, _bytes: &[u8]) -> Option<Sha256d> {
        None
    }
}

impl MerkleBlockCodec for NullCollaborator {
    fn parse(&self, _bytes: &[u8]) -> Option<ParsedMerkleBlock> {
        None
    }

    fn is_valid(&self, _block: &ParsedMerkleBlock, _now: u64) -> bool {
        false
    }
}

impl HeaderValidator for NullCollaborator {
    fn validate(&self, _header: &[u8; 80], _now: u64) -> bool {
        true
    }
}
