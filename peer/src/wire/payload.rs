//! Binary encodings for the fixed-shape pieces of message payloads:
//! varints, inventory items, addr entries, raw block headers, and the
//! `version` message. These are pure, allocation-light functions; the
//! sync and handshake handlers own all protocol *behavior*.
use thiserror::Error;

use crate::hash::Sha256d;

/// A malformed payload: either the byte count didn't match the declared
/// item count, or a length-prefixed field ran past the end of the
/// buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("malformed payload")]
pub struct PayloadError;

/// Decode a Bitcoin-style CompactSize integer. Returns the value and the
/// number of bytes it occupied.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize), PayloadError> {
    match buf.first() {
        None => Err(PayloadError),
        Some(&tag) if tag < 0xfd => Ok((tag as u64, 1)),
        Some(0xfd) => {
            let bytes: [u8; 2] = buf.get(1..3).ok_or(PayloadError)?.try_into().unwrap();
            Ok((u16::from_le_bytes(bytes) as u64, 3))
        }
        Some(0xfe) => {
            let bytes: [u8; 4] = buf.get(1..5).ok_or(PayloadError)?.try_into().unwrap();
            Ok((u32::from_le_bytes(bytes) as u64, 5))
        }
        Some(0xff) => {
            let bytes: [u8; 8] = buf.get(1..9).ok_or(PayloadError)?.try_into().unwrap();
            Ok((u64::from_le_bytes(bytes), 9))
        }
        Some(_) => unreachable!(),
    }
}

/// Encode a value as a canonical (minimal-length) CompactSize integer.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_varstr(out: &mut Vec<u8>, s: &str) {
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn read_varstr(buf: &[u8]) -> Result<(String, usize), PayloadError> {
    let (len, prefix) = read_varint(buf)?;
    let len = len as usize;
    let bytes = buf.get(prefix..prefix + len).ok_or(PayloadError)?;
    let s = String::from_utf8_lossy(bytes).into_owned();
    Ok((s, prefix + len))
}

/// An `inv`/`getdata` item kind. `Unknown` preserves the wire value for
/// unrecognized types so a `notfound` reply can echo it back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
    Unknown(u32),
}

impl InvType {
    pub fn to_wire(self) -> u32 {
        match self {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
            InvType::Unknown(n) => n,
        }
    }

    pub fn from_wire(n: u32) -> Self {
        match n {
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            n => InvType::Unknown(n),
        }
    }
}

/// One `(type, hash)` pair as carried in `inv`, `getdata`, and `notfound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryItem {
    pub kind: InvType,
    pub hash: Sha256d,
}

const INV_ITEM_LEN: usize = 36;

/// Decode a full `inv`/`getdata`/`notfound` payload: a varint count
/// followed by that many 36-byte `(type, hash)` pairs. Fails if the
/// declared count doesn't exactly account for the remaining bytes.
pub fn decode_inventory(payload: &[u8]) -> Result<Vec<InventoryItem>, PayloadError> {
    let (count, mut off) = read_varint(payload)?;
    let expected_len = off + count as usize * INV_ITEM_LEN;
    if expected_len != payload.len() {
        return Err(PayloadError);
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
        let hash: [u8; 32] = payload[off + 4..off + 36].try_into().unwrap();
        items.push(InventoryItem {
            kind: InvType::from_wire(kind),
            hash: Sha256d(hash),
        });
        off += INV_ITEM_LEN;
    }
    Ok(items)
}

/// Encode an `inv`/`getdata` payload from a list of items.
pub fn encode_inventory(items: &[InventoryItem]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + items.len() * INV_ITEM_LEN);
    write_varint(&mut out, items.len() as u64);
    for item in items {
        out.extend_from_slice(&item.kind.to_wire().to_le_bytes());
        out.extend_from_slice(item.hash.as_ref());
    }
    out
}

/// A `getheaders`/`getblocks` payload: `[version][locators][hash-stop]`.
pub fn encode_locator_request(protocol_version: u32, locators: &[Sha256d], stop: Sha256d) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 9 + locators.len() * 32 + 32);
    out.extend_from_slice(&protocol_version.to_le_bytes());
    write_varint(&mut out, locators.len() as u64);
    for hash in locators {
        out.extend_from_slice(hash.as_ref());
    }
    out.extend_from_slice(stop.as_ref());
    out
}

/// The raw 80-byte block header serialization. The core never interprets
/// its fields beyond the timestamp (used for sync switchover) and the
/// double-SHA-256 block hash; proof-of-work and full validation is the
/// header collaborator's job.
pub const BLOCK_HEADER_LEN: usize = 80;
/// Offset of the 4-byte little-endian timestamp field within a header.
const TIMESTAMP_OFFSET: usize = 68;

#[derive(Debug, Clone, Copy)]
pub struct RawBlockHeader(pub [u8; BLOCK_HEADER_LEN]);

impl RawBlockHeader {
    pub fn timestamp(&self) -> u32 {
        u32::from_le_bytes(self.0[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].try_into().unwrap())
    }

    pub fn block_hash(&self) -> Sha256d {
        Sha256d::hash(&self.0)
    }
}

/// Decode a `headers` payload: a varint count followed by that many
/// 81-byte entries (80-byte header + a trailing zero transaction count).
pub fn decode_headers(payload: &[u8]) -> Result<Vec<RawBlockHeader>, PayloadError> {
    const ENTRY_LEN: usize = BLOCK_HEADER_LEN + 1;
    let (count, off) = read_varint(payload)?;
    if off + count as usize * ENTRY_LEN != payload.len() {
        return Err(PayloadError);
    }
    let mut headers = Vec::with_capacity(count as usize);
    let mut cursor = off;
    for _ in 0..count {
        let mut header = [0u8; BLOCK_HEADER_LEN];
        header.copy_from_slice(&payload[cursor..cursor + BLOCK_HEADER_LEN]);
        // Trailing byte is the (always zero) transaction count varint.
        headers.push(RawBlockHeader(header));
        cursor += ENTRY_LEN;
    }
    Ok(headers)
}

/// One entry of an `addr` message: 30 bytes (timestamp, services,
/// 16-byte address, big-endian port).
#[derive(Debug, Clone, Copy)]
pub struct AddrEntry {
    pub timestamp: u32,
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

const ADDR_ENTRY_LEN: usize = 30;

pub fn decode_addr(payload: &[u8]) -> Result<Vec<AddrEntry>, PayloadError> {
    let (count, off) = read_varint(payload)?;
    if off + count as usize * ADDR_ENTRY_LEN != payload.len() {
        return Err(PayloadError);
    }
    let mut entries = Vec::with_capacity(count as usize);
    let mut cursor = off;
    for _ in 0..count {
        let timestamp = u32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap());
        let services = u64::from_le_bytes(payload[cursor + 4..cursor + 12].try_into().unwrap());
        let ip: [u8; 16] = payload[cursor + 12..cursor + 28].try_into().unwrap();
        let port = u16::from_be_bytes(payload[cursor + 28..cursor + 30].try_into().unwrap());
        entries.push(AddrEntry { timestamp, services, ip, port });
        cursor += ADDR_ENTRY_LEN;
    }
    Ok(entries)
}

/// An empty `addr` reply (this peer never shares an address list).
pub fn encode_empty_addr() -> Vec<u8> {
    let mut out = Vec::with_capacity(1);
    write_varint(&mut out, 0);
    out
}

/// The `version` message fields this peer sends. Mirrors the layout
/// BRPeer.c's `BRPeerSendVersionMessage` writes byte-for-byte.
pub struct VersionMessage {
    pub protocol_version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub addr_recv_services: u64,
    pub addr_recv_ip: [u8; 16],
    pub addr_recv_port: u16,
    pub addr_from_services: u64,
    pub addr_from_ip: [u8; 16],
    pub addr_from_port: u16,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

pub fn encode_version(msg: &VersionMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(86 + msg.user_agent.len());
    out.extend_from_slice(&msg.protocol_version.to_le_bytes());
    out.extend_from_slice(&msg.services.to_le_bytes());
    out.extend_from_slice(&msg.timestamp.to_le_bytes());
    out.extend_from_slice(&msg.addr_recv_services.to_le_bytes());
    out.extend_from_slice(&msg.addr_recv_ip);
    out.extend_from_slice(&msg.addr_recv_port.to_be_bytes());
    out.extend_from_slice(&msg.addr_from_services.to_le_bytes());
    out.extend_from_slice(&msg.addr_from_ip);
    out.extend_from_slice(&msg.addr_from_port.to_be_bytes());
    out.extend_from_slice(&msg.nonce.to_le_bytes());
    write_varstr(&mut out, &msg.user_agent);
    out.extend_from_slice(&msg.start_height.to_le_bytes());
    out.push(msg.relay as u8);
    out
}

/// The fields this peer cares about from a *remote* `version` message.
#[derive(Debug, Clone)]
pub struct RemoteVersion {
    pub protocol_version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub user_agent: String,
    pub start_height: u32,
}

/// Minimum byte length of a `version` payload, matching BRPeer.c's
/// coarse sanity floor (enough room for every fixed field plus a
/// minimal varint-prefixed user agent).
pub const MIN_VERSION_LEN: usize = 85;

pub fn decode_version(payload: &[u8]) -> Result<RemoteVersion, PayloadError> {
    if payload.len() < MIN_VERSION_LEN {
        return Err(PayloadError);
    }
    let mut off = 0;
    let protocol_version = u32::from_le_bytes(payload[off..off + 4].try_into().unwrap());
    off += 4;
    let services = u64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
    off += 8;
    let timestamp = u64::from_le_bytes(payload[off..off + 8].try_into().unwrap());
    off += 8;
    // addr_recv (services + ip + port)
    off += 8 + 16 + 2;
    // addr_from (services + ip + port)
    off += 8 + 16 + 2;
    // nonce
    off += 8;
    let (user_agent, len) = read_varstr(payload.get(off..).ok_or(PayloadError)?)?;
    off += len;
    let start_height = u32::from_le_bytes(
        payload.get(off..off + 4).ok_or(PayloadError)?.try_into().unwrap(),
    );
    Ok(RemoteVersion {
        protocol_version,
        services,
        timestamp,
        user_agent,
        start_height,
    })
}

/// A decoded `ping`/`pong` payload: an 8-byte little-endian nonce.
pub fn decode_nonce(payload: &[u8]) -> Result<u64, PayloadError> {
    let bytes: [u8; 8] = payload.try_into().map_err(|_| PayloadError)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn encode_nonce(nonce: u64) -> Vec<u8> {
    nonce.to_le_bytes().to_vec()
}

/// A decoded `reject` message.
#[derive(Debug, Clone)]
pub struct Reject {
    pub message: String,
    pub code: u8,
    pub reason: String,
    pub hash: Option<Sha256d>,
}

pub fn decode_reject(payload: &[u8]) -> Result<Reject, PayloadError> {
    let (message, off) = read_varstr(payload)?;
    let code = *payload.get(off).ok_or(PayloadError)?;
    let (reason, len) = read_varstr(payload.get(off + 1..).ok_or(PayloadError)?)?;
    let hash_off = off + 1 + len;
    let hash = match payload.get(hash_off..hash_off + 32) {
        Some(bytes) => Some(Sha256d(bytes.try_into().unwrap())),
        None => None,
    };
    Ok(Reject { message, code, reason, hash })
}
