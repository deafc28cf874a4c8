//! The 18 command names a peer recognizes, NUL-padded to 12 bytes as they
//! appear on the wire.

const fn pad12(name: &[u8]) -> [u8; 12] {
    let mut out = [0u8; 12];
    let mut i = 0;
    while i < name.len() {
        out[i] = name[i];
        i += 1;
    }
    out
}

pub const VERSION: [u8; 12] = pad12(b"version");
pub const VERACK: [u8; 12] = pad12(b"verack");
pub const ADDR: [u8; 12] = pad12(b"addr");
pub const INV: [u8; 12] = pad12(b"inv");
pub const GETDATA: [u8; 12] = pad12(b"getdata");
pub const NOTFOUND: [u8; 12] = pad12(b"notfound");
pub const GETBLOCKS: [u8; 12] = pad12(b"getblocks");
pub const GETHEADERS: [u8; 12] = pad12(b"getheaders");
pub const TX: [u8; 12] = pad12(b"tx");
pub const BLOCK: [u8; 12] = pad12(b"block");
pub const MERKLEBLOCK: [u8; 12] = pad12(b"merkleblock");
pub const HEADERS: [u8; 12] = pad12(b"headers");
pub const MEMPOOL: [u8; 12] = pad12(b"mempool");
pub const PING: [u8; 12] = pad12(b"ping");
pub const PONG: [u8; 12] = pad12(b"pong");
pub const FILTERLOAD: [u8; 12] = pad12(b"filterload");
pub const GETADDR: [u8; 12] = pad12(b"getaddr");
pub const REJECT: [u8; 12] = pad12(b"reject");

/// Render a 12-byte command field back to its printable name, for logging.
/// Unknown or malformed fields degrade to a lossy UTF-8 view of the
/// non-NUL prefix; this is display-only and never used for dispatch.
pub fn display(command: &[u8; 12]) -> String {
    let end = command.iter().position(|&b| b == 0).unwrap_or(12);
    String::from_utf8_lossy(&command[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fit_and_pad() {
        assert_eq!(&VERSION[..7], b"version");
        assert_eq!(&VERSION[7..], &[0u8; 5]);
        assert_eq!(&MERKLEBLOCK[..11], b"merkleblock");
        assert_eq!(&MERKLEBLOCK[11..], &[0u8; 1]);
    }

    #[test]
    fn display_stops_at_first_nul() {
        assert_eq!(display(&PING), "ping");
        assert_eq!(display(&GETHEADERS), "getheaders");
    }
}
