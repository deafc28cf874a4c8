//! Frame codec: the 24-byte header (magic, command, length, checksum)
//! plus payload that every message is wrapped in, and the magic-number
//! resync discipline that lets the decoder recover from a desynced
//! stream without closing the connection.
use thiserror::Error;

use crate::hash::frame_checksum;

/// Header length in bytes: 4 (magic) + 12 (command) + 4 (length) + 4 (checksum).
pub const HEADER_LEN: usize = 24;
/// Maximum accepted payload length. Larger frames are rejected outright.
pub const MAX_MSG_LENGTH: u32 = 0x0200_0000;

/// A reason a frame failed to decode. All of these are fatal to the
/// connection (see §7 of the design: malformed frame / bad checksum are
/// protocol errors).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The command field has non-zero bytes after its first NUL.
    #[error("malformed command name")]
    MalformedCommand,
    /// The declared payload length exceeds [`MAX_MSG_LENGTH`].
    #[error("oversized payload: {0} bytes")]
    Oversized(u32),
    /// The payload's double-SHA-256 doesn't match the header's checksum.
    #[error("checksum mismatch")]
    BadChecksum,
}

/// A decoded message: its 12-byte NUL-padded command and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: [u8; 12],
    pub payload: Vec<u8>,
}

/// Encode a complete frame (header + payload) ready to write to the wire.
pub fn encode(magic: u32, command: [u8; 12], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&command);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&frame_checksum(payload));
    out.extend_from_slice(payload);
    out
}

fn validate_command(bytes: &[u8]) -> Result<[u8; 12], FrameError> {
    debug_assert_eq!(bytes.len(), 12);
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        if bytes[nul..].iter().any(|&b| b != 0) {
            return Err(FrameError::MalformedCommand);
        }
    }
    let mut command = [0u8; 12];
    command.copy_from_slice(bytes);
    Ok(command)
}

/// Drop leading bytes from `buf` that cannot be the start of a valid
/// frame, by locating the next occurrence of `magic` (little-endian).
/// If no occurrence is found, all but the last 3 bytes are dropped,
/// since those may be a prefix of a magic sequence split across reads.
///
/// This is the decoder's resync discipline: a desynced stream recovers
/// on its own, one shifted byte at a time conceptually (here done in one
/// pass), without the connection being torn down.
fn resync(buf: &mut Vec<u8>, magic: u32) {
    if buf.len() < 4 {
        return;
    }
    let needle = magic.to_le_bytes();
    match buf.windows(4).position(|w| w == needle) {
        Some(0) => {}
        Some(idx) => {
            buf.drain(0..idx);
        }
        None => {
            let keep = buf.len().min(3);
            let drop_to = buf.len() - keep;
            buf.drain(0..drop_to);
        }
    }
}

/// Attempt to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. On success or on a
/// fatal [`FrameError`], the consumed bytes (including any junk dropped
/// during resync) are removed from `buf`. Junk dropped while waiting for
/// more data is also removed as a side effect even when `Ok(None)` is
/// returned, so repeated calls as bytes trickle in never re-scan the
/// same junk twice.
pub fn decode(buf: &mut Vec<u8>, magic: u32) -> Result<Option<Frame>, FrameError> {
    resync(buf, magic);
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let command = validate_command(&buf[4..16])?;
    let length = u32::from_le_bytes(buf[16..20].try_into().unwrap());
    if length > MAX_MSG_LENGTH {
        return Err(FrameError::Oversized(length));
    }
    let checksum: [u8; 4] = buf[20..24].try_into().unwrap();

    let total = HEADER_LEN + length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = buf[HEADER_LEN..total].to_vec();
    if frame_checksum(&payload) != checksum {
        buf.drain(0..total);
        return Err(FrameError::BadChecksum);
    }
    buf.drain(0..total);

    Ok(Some(Frame { command, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MAGIC: u32 = 0xd9b4bef9;

    #[test]
    fn round_trip() {
        let payload = b"hello peer".to_vec();
        let mut bytes = encode(MAGIC, super::super::command::PING, &payload);
        let frame = decode(&mut bytes, MAGIC).unwrap().unwrap();
        assert_eq!(frame.command, super::super::command::PING);
        assert_eq!(frame.payload, payload);
        assert!(bytes.is_empty());
    }

    #[test]
    fn needs_more_bytes() {
        let mut bytes = encode(MAGIC, super::super::command::PING, b"abc");
        bytes.truncate(bytes.len() - 1);
        assert_eq!(decode(&mut bytes, MAGIC), Ok(None));
    }

    #[test]
    fn resyncs_past_junk() {
        let mut bytes = vec![0xff, 0x00, 0xaa, 0x11, 0x22];
        bytes.extend(encode(MAGIC, super::super::command::PONG, b"xyz"));
        let frame = decode(&mut bytes, MAGIC).unwrap().unwrap();
        assert_eq!(frame.command, super::super::command::PONG);
        assert_eq!(frame.payload, b"xyz");
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut bytes = encode(MAGIC, super::super::command::PING, b"abc");
        // Corrupt a payload byte without touching the checksum.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(decode(&mut bytes, MAGIC), Err(FrameError::BadChecksum));
    }

    #[test]
    fn rejects_oversized_length() {
        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&super::super::command::TX);
        header.extend_from_slice(&(MAX_MSG_LENGTH + 1).to_le_bytes());
        header.extend_from_slice(&[0u8; 4]);
        assert_eq!(
            decode(&mut header, MAGIC),
            Err(FrameError::Oversized(MAX_MSG_LENGTH + 1))
        );
    }

    #[test]
    fn rejects_trailing_garbage_after_nul_in_command() {
        let mut bytes = encode(MAGIC, super::super::command::PING, b"abc");
        bytes[4 + 4] = b'z'; // one byte after the NUL terminator of "ping"
        assert_eq!(decode(&mut bytes, MAGIC), Err(FrameError::MalformedCommand));
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut bytes = encode(MAGIC, super::super::command::TX, &payload);
            let frame = decode(&mut bytes, MAGIC).unwrap().unwrap();
            prop_assert_eq!(frame.command, super::super::command::TX);
            prop_assert_eq!(frame.payload, payload);
        }

        #[test]
        fn prop_resync(
            junk in proptest::collection::vec(any::<u8>(), 0..23),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut bytes = junk;
            bytes.extend(encode(MAGIC, super::super::command::INV, &payload));
            let frame = decode(&mut bytes, MAGIC).unwrap().unwrap();
            prop_assert_eq!(frame.command, super::super::command::INV);
            prop_assert_eq!(frame.payload, payload);
        }
    }
}
