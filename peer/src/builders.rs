//! Outbound message builders. Each function returns the raw payload
//! bytes for one command, and where the protocol requires it, flips the
//! corresponding `sent_*` flag on [`SyncState`] so later receive-side
//! guards can gate on it.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hash::Sha256d;
use crate::state::SyncState;
use crate::wire::payload::{
    encode_empty_addr, encode_inventory, encode_locator_request, encode_nonce, encode_version,
    InvType, InventoryItem, VersionMessage,
};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn to_ipv6_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// The local loopback address used as `addr_from` on outbound `version`
/// messages (we never listen for inbound connections).
const LOCAL_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;
const STANDARD_PORT: u16 = 8333;

/// Build the `version` payload sent on connect. `remote_services` and
/// `remote_addr` are echoed back as the handshake requires.
pub fn version(
    protocol_version: u32,
    user_agent: &str,
    nonce: u64,
    remote_services: u64,
    remote_addr: IpAddr,
    remote_port: u16,
) -> Vec<u8> {
    let msg = VersionMessage {
        protocol_version,
        services: 0, // SPV node advertises no services.
        timestamp: now_secs(),
        addr_recv_services: remote_services,
        addr_recv_ip: to_ipv6_bytes(remote_addr),
        addr_recv_port: remote_port,
        addr_from_services: 0,
        addr_from_ip: to_ipv6_bytes(IpAddr::V4(LOCAL_HOST)),
        addr_from_port: STANDARD_PORT,
        nonce,
        user_agent: user_agent.to_string(),
        start_height: 0,
        relay: false, // bloom-filter mode: don't ask for unfiltered relay.
    };
    encode_version(&msg)
}

/// `verack` carries no payload.
pub fn verack() -> Vec<u8> {
    Vec::new()
}

/// Empty `addr` reply to an unsolicited `getaddr` (this peer shares no
/// address list).
pub fn addr() -> Vec<u8> {
    encode_empty_addr()
}

/// Pass the caller-supplied bloom filter bytes through verbatim, and
/// mark that a filter has been sent.
pub fn filterload(state: &mut SyncState, filter_bytes: Vec<u8>) -> Vec<u8> {
    state.sent_filter = true;
    filter_bytes
}

/// `mempool` carries no payload.
pub fn mempool(state: &mut SyncState) -> Vec<u8> {
    state.sent_mempool = true;
    Vec::new()
}

/// `getaddr` carries no payload.
pub fn getaddr(state: &mut SyncState) -> Vec<u8> {
    state.sent_getaddr = true;
    Vec::new()
}

pub fn getheaders(protocol_version: u32, locators: &[Sha256d], stop: Sha256d) -> Vec<u8> {
    encode_locator_request(protocol_version, locators, stop)
}

pub fn getblocks(state: &mut SyncState, protocol_version: u32, locators: &[Sha256d], stop: Sha256d) -> Vec<u8> {
    state.sent_getblocks = true;
    encode_locator_request(protocol_version, locators, stop)
}

/// Build an `inv` payload, deduping against `known_tx_hash_set` and
/// recording every transmitted tx hash as known before the message is
/// sent — once we tell a peer about a hash, we consider it seen.
pub fn inv(state: &mut SyncState, tx_hashes: &[Sha256d], block_hashes: &[Sha256d]) -> Vec<u8> {
    let mut items = Vec::with_capacity(tx_hashes.len() + block_hashes.len());
    for &hash in tx_hashes {
        if state.remember_tx_hash(hash) {
            items.push(InventoryItem { kind: InvType::Tx, hash });
        }
    }
    for &hash in block_hashes {
        items.push(InventoryItem { kind: InvType::Block, hash });
    }
    encode_inventory(&items)
}

/// Build a `getdata` payload requesting the given tx and block hashes.
/// Total item count is bounded by the caller (the sync handler enforces
/// the 50 000-item ceiling); sets `sent_getdata`.
pub fn getdata(state: &mut SyncState, tx_hashes: &[Sha256d], block_hashes: &[Sha256d]) -> Vec<u8> {
    state.sent_getdata = true;
    let mut items = Vec::with_capacity(tx_hashes.len() + block_hashes.len());
    for &hash in tx_hashes {
        items.push(InventoryItem { kind: InvType::Tx, hash });
    }
    for &hash in block_hashes {
        items.push(InventoryItem { kind: InvType::FilteredBlock, hash });
    }
    encode_inventory(&items)
}

/// `ping` payload is the peer's own nonce (the same one sent in
/// `version` — `BRPeerSendPing` echoes `ctx->nonce`, not a fresh value,
/// since `handle_pong` validates the echo against it). Also stamps
/// `start_time` so the round trip can be timed.
pub fn ping(state: &mut SyncState) -> Vec<u8> {
    state.start_time = Some(now_secs());
    encode_nonce(state.nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn state() -> SyncState {
        SyncState::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333, 0)
    }

    #[test]
    fn inv_dedupes_and_marks_known() {
        let mut s = state();
        let h = Sha256d([9; 32]);
        let payload1 = inv(&mut s, &[h], &[]);
        assert!(!payload1.is_empty());
        let payload2 = inv(&mut s, &[h], &[]);
        // Already known: only the varint count (zero items) remains.
        assert_eq!(payload2, vec![0u8]);
    }

    #[test]
    fn getdata_sets_flag() {
        let mut s = state();
        assert!(!s.sent_getdata);
        getdata(&mut s, &[Sha256d([1; 32])], &[]);
        assert!(s.sent_getdata);
    }
}
