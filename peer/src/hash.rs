//! 32-byte double-SHA-256 hashes, used for both block and transaction ids.
//!
//! The core never computes these itself for transaction or Merkle-block
//! payloads (that's a collaborator's job, see [`crate::collab`]); this
//! module exists for the frame checksum and header-hash bookkeeping the
//! wire protocol itself is responsible for.
use std::fmt;

use bitcoin_hashes::{sha256d, Hash as _};

/// A 32-byte double-SHA-256 digest, stored internally reversed the way
/// Bitcoin displays block and transaction ids (big-endian hex).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256d(pub [u8; 32]);

impl Sha256d {
    /// The all-zero hash, used as a `hash-stop` sentinel in locator
    /// requests and as the "no previous tip" marker.
    pub const ZERO: Sha256d = Sha256d([0u8; 32]);

    /// Compute the double-SHA-256 digest of `data`.
    pub fn hash(data: &[u8]) -> Self {
        let digest = sha256d::Hash::hash(data);
        Sha256d(digest.into_inner())
    }

    /// The first 4 bytes, as used in a frame header's checksum field.
    pub fn checksum_bytes(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }
}

impl AsRef<[u8]> for Sha256d {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Sha256d {
    fn from(bytes: [u8; 32]) -> Self {
        Sha256d(bytes)
    }
}

impl fmt::Debug for Sha256d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for Sha256d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compute the 4-byte checksum used in a message frame header: the first
/// four bytes of the double-SHA-256 of the payload.
pub fn frame_checksum(payload: &[u8]) -> [u8; 4] {
    Sha256d::hash(payload).checksum_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload() {
        // Well-known double-SHA-256 of the empty string.
        let checksum = frame_checksum(&[]);
        assert_eq!(checksum, [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn debug_is_reverse_hex() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0xab;
        bytes[30] = 0xcd;
        let hash = Sha256d(bytes);
        assert_eq!(format!("{:?}", hash), format!("abcd{}", "00".repeat(30)));
    }
}
