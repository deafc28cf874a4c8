//! The SPV sync state machine: one handler per recognized command,
//! driving header streaming, bloom-gated inventory, and merkle-block
//! completion tracking. Handlers run exclusively on the receive thread
//! and are the only code that mutates [`SyncState`].
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};

use crate::builders;
use crate::callbacks::Callbacks;
use crate::collab::{HeaderValidator, MerkleBlockCodec, TransactionCodec};
use crate::config::{self, PeerConfig};
use crate::error::{DisconnectReason, ProtocolError};
use crate::hash::Sha256d;
use crate::state::{Deadline, PendingMerkleBlock, SyncState};
use crate::wire::command;
use crate::wire::payload::{
    decode_addr, decode_headers, decode_inventory, decode_nonce, decode_reject, decode_version,
    InvType, InventoryItem,
};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Frames a handler wants written to the socket once it returns. Keeps
/// handler functions pure with respect to I/O rather than writing
/// inline.
#[derive(Default)]
pub struct Outbox {
    frames: Vec<([u8; 12], Vec<u8>)>,
}

impl Outbox {
    pub fn push(&mut self, command: [u8; 12], payload: Vec<u8>) {
        self.frames.push((command, payload));
    }

    pub fn drain(&mut self) -> Vec<([u8; 12], Vec<u8>)> {
        std::mem::take(&mut self.frames)
    }
}

/// Everything a handler needs: mutable sync state, configuration,
/// owner callbacks, the pluggable collaborators, and an outbox to
/// collect replies in.
pub struct SyncContext<'a> {
    pub state: &'a mut SyncState,
    pub config: &'a PeerConfig,
    pub callbacks: &'a Callbacks,
    pub tx_codec: &'a dyn TransactionCodec,
    pub merkle_codec: &'a dyn MerkleBlockCodec,
    pub header_validator: &'a dyn HeaderValidator,
    pub out: &'a mut Outbox,
    pub deadline: &'a Deadline,
}

type HandlerResult = Result<(), DisconnectReason>;

fn guard(ok: bool, reason: &'static str) -> HandlerResult {
    if ok {
        Ok(())
    } else {
        Err(DisconnectReason::Protocol(ProtocolError::Guard(reason)))
    }
}

pub fn handle_version(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let remote = decode_version(payload).map_err(ProtocolError::from)?;
    if remote.protocol_version < ctx.config.min_protocol_version {
        return Err(ProtocolError::PeerProtocolVersion(remote.protocol_version).into());
    }
    ctx.state.remote_version = remote.protocol_version;
    ctx.state.services = remote.services;
    ctx.state.remote_user_agent = remote.user_agent;
    ctx.state.remote_height = remote.start_height;

    ctx.out.push(command::VERACK, builders::verack());
    ctx.state.sent_verack = true;
    Ok(())
}

pub fn handle_verack(ctx: &mut SyncContext) -> HandlerResult {
    if ctx.state.got_verack {
        return Ok(()); // duplicate verack: benign
    }
    if let Some(start) = ctx.state.start_time {
        ctx.state.ping_time = now_secs().saturating_sub(start) as f64;
    }
    ctx.state.got_verack = true;
    ctx.state.start_time = None;
    if ctx.state.maybe_complete_handshake() {
        ctx.deadline.disable();
        (ctx.callbacks.connected)();
    }
    Ok(())
}

pub fn handle_addr(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    if !ctx.state.sent_getaddr {
        return Ok(()); // unsolicited: benign
    }
    let entries = decode_addr(payload).map_err(ProtocolError::from)?;
    if entries.len() > config::MAX_ADDR_ITEMS {
        return Ok(()); // excessive but not fatal
    }
    let now = now_secs();
    let mut kept = Vec::new();
    for mut entry in entries {
        let is_ipv4_mapped = entry.ip[..12] == [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];
        if entry.services & config::SERVICES_NODE_NETWORK == 0 || !is_ipv4_mapped {
            continue;
        }
        if entry.timestamp == 0 || entry.timestamp as u64 > now + 600 {
            entry.timestamp = now.saturating_sub(config::ADDR_GHOST_AGE) as u32;
        }
        entry.timestamp = entry.timestamp.saturating_sub(config::ADDR_TIME_SKEW as u32);
        kept.push(entry);
    }
    (ctx.callbacks.relayed_peers)(&kept);
    Ok(())
}

pub fn handle_inv(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let items = decode_inventory(payload).map_err(ProtocolError::from)?;
    if items.len() > config::MAX_INV_ITEMS {
        return Err(DisconnectReason::Excess("inv item count"));
    }

    let tx_items: Vec<&InventoryItem> =
        items.iter().filter(|i| i.kind == InvType::Tx).collect();
    let block_items: Vec<&InventoryItem> = items
        .iter()
        .filter(|i| matches!(i.kind, InvType::Block | InvType::FilteredBlock))
        .collect();

    guard(
        tx_items.is_empty()
            || ctx.state.sent_filter
            || ctx.state.sent_mempool
            || ctx.state.sent_getblocks,
        "tx inv announced without solicitation",
    )?;
    if tx_items.len() > config::MAX_TX_ITEMS {
        return Err(DisconnectReason::Excess("tx inv count"));
    }

    if ctx.state.current_block_height > 0
        && block_items.len() > 2
        && block_items.len() < 500
        && (ctx.state.current_block_height as u64
            + ctx.state.known_block_hashes.len() as u64
            + block_items.len() as u64)
            < ctx.state.remote_height as u64
    {
        return Err(DisconnectReason::Excess("tarpit: drip-fed block inv"));
    }

    let mut new_block_hashes = Vec::new();
    if block_items.len() == 1 {
        let hash = block_items[0].hash;
        if ctx.state.last_block_hash != Some(hash) {
            ctx.state.last_block_hash = Some(hash);
            ctx.state.remember_block_hash(hash);
            new_block_hashes.push(hash);
        }
    } else {
        for item in &block_items {
            ctx.state.remember_block_hash(item.hash);
            new_block_hashes.push(item.hash);
        }
    }

    let mut new_tx_hashes = Vec::new();
    for item in &tx_items {
        if ctx.state.remember_tx_hash(item.hash) {
            new_tx_hashes.push(item.hash);
            (ctx.callbacks.has_tx)(item.hash);
        }
    }

    let block_request = if ctx.state.needs_filter_update {
        Vec::new()
    } else {
        new_block_hashes.clone()
    };
    if !new_tx_hashes.is_empty() || !block_request.is_empty() {
        let payload = builders::getdata(ctx.state, &new_tx_hashes, &block_request);
        ctx.out.push(command::GETDATA, payload);
    }

    // Mirrors the original treating the block count as zero while a
    // filter update is pending: `block_request` is already empty in
    // that case, so this follow-up `getblocks` is suppressed right
    // along with the `getdata` above.
    if block_request.len() >= 500 {
        if let (Some(&last), Some(&first)) =
            (new_block_hashes.last(), new_block_hashes.first())
        {
            let locators = [last, first];
            let payload =
                builders::getblocks(ctx.state, ctx.config.protocol_version, &locators, Sha256d::ZERO);
            ctx.out.push(command::GETBLOCKS, payload);
        }
    }

    Ok(())
}

pub fn handle_tx(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let hash = ctx
        .tx_codec
        .parse(payload)
        .ok_or(ProtocolError::Guard("tx did not parse"))?;
    guard(
        ctx.state.sent_filter || ctx.state.sent_getdata,
        "tx relayed without solicitation",
    )?;
    (ctx.callbacks.relayed_tx)(payload);

    if let Some(pending) = &mut ctx.state.current_block {
        pending.outstanding.remove(&hash);
        if pending.outstanding.is_empty() {
            let header = pending.header;
            ctx.state.current_block = None;
            (ctx.callbacks.relayed_block)(&header);
        }
    }
    Ok(())
}

pub fn handle_headers(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let headers = decode_headers(payload).map_err(ProtocolError::from)?;
    if headers.is_empty() {
        return Err(ProtocolError::Guard("empty headers message").into());
    }
    let count = headers.len();
    let last_timestamp = headers[count - 1].timestamp() as u64;
    let earliest = ctx.state.earliest_key_time;
    let switchover = last_timestamp > 0
        && last_timestamp + 7 * 24 * 60 * 60 + config::BLOCK_MAX_TIME_DRIFT >= earliest;

    guard(count >= config::MAX_HEADERS_ITEMS || switchover, "non-standard headers message")?;

    let last_hash = headers[count - 1].block_hash();
    let first_hash = headers[0].block_hash();

    if switchover {
        let mut idx = 1usize;
        let mut ts = if idx < count { headers[idx].timestamp() as u64 } else { 0 };
        while ts > 0 && ts + 7 * 24 * 60 * 60 + config::BLOCK_MAX_TIME_DRIFT < earliest {
            idx += 1;
            ts = if idx < count { headers[idx].timestamp() as u64 } else { 0 };
        }
        let locator0 = headers[idx - 1].block_hash();
        let payload = builders::getblocks(
            ctx.state,
            ctx.config.protocol_version,
            &[locator0, first_hash],
            Sha256d::ZERO,
        );
        ctx.out.push(command::GETBLOCKS, payload);
    } else {
        let payload = builders::getheaders(
            ctx.config.protocol_version,
            &[last_hash, first_hash],
            Sha256d::ZERO,
        );
        ctx.out.push(command::GETHEADERS, payload);
    }

    let now = now_secs();
    for header in &headers {
        if !ctx.header_validator.validate(&header.0, now) {
            return Err(ProtocolError::Guard("invalid block header").into());
        }
        (ctx.callbacks.relayed_block)(&header.0);
    }
    Ok(())
}

pub fn handle_getaddr(ctx: &mut SyncContext) -> HandlerResult {
    ctx.out.push(command::ADDR, builders::addr());
    Ok(())
}

pub fn handle_getdata(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let items = decode_inventory(payload).map_err(ProtocolError::from)?;
    let mut not_found = Vec::new();
    for item in items {
        if item.kind == InvType::Tx {
            match (ctx.callbacks.requested_tx)(item.hash) {
                Some(bytes) => ctx.out.push(command::TX, bytes),
                None => not_found.push(item),
            }
        } else {
            not_found.push(item);
        }
    }
    if !not_found.is_empty() {
        ctx.out.push(
            command::NOTFOUND,
            crate::wire::payload::encode_inventory(&not_found),
        );
    }
    Ok(())
}

pub fn handle_notfound(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let items = decode_inventory(payload).map_err(ProtocolError::from)?;
    let tx_hashes: Vec<Sha256d> = items
        .iter()
        .filter(|i| i.kind == InvType::Tx)
        .map(|i| i.hash)
        .collect();
    let block_hashes: Vec<Sha256d> = items
        .iter()
        .filter(|i| i.kind != InvType::Tx)
        .map(|i| i.hash)
        .collect();
    (ctx.callbacks.notfound)(&tx_hashes, &block_hashes);
    Ok(())
}

pub fn handle_ping(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let nonce = decode_nonce(payload).map_err(ProtocolError::from)?;
    ctx.out
        .push(command::PONG, crate::wire::payload::encode_nonce(nonce));
    Ok(())
}

pub fn handle_pong(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let nonce = decode_nonce(payload).map_err(ProtocolError::from)?;
    if nonce != ctx.state.nonce {
        return Err(ProtocolError::UnexpectedPong.into());
    }
    let callback = ctx
        .state
        .pong_callbacks
        .pop_front()
        .ok_or(ProtocolError::NoOutstandingPing)?;
    if let Some(start) = ctx.state.start_time {
        ctx.state.ping_time = 0.5 * ctx.state.ping_time + 0.5 * now_secs().saturating_sub(start) as f64;
        ctx.state.start_time = None;
    }
    callback(true);
    Ok(())
}

pub fn handle_merkleblock(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let parsed = ctx
        .merkle_codec
        .parse(payload)
        .ok_or(ProtocolError::Guard("merkleblock did not parse"))?;
    guard(
        ctx.state.sent_filter || ctx.state.sent_getdata,
        "merkleblock without solicitation",
    )?;
    let now = now_secs();
    guard(ctx.merkle_codec.is_valid(&parsed, now), "invalid merkleblock")?;

    let outstanding: std::collections::HashSet<Sha256d> = parsed
        .tx_hashes
        .into_iter()
        .filter(|h| !ctx.state.known_tx_hash_set.contains(h))
        .collect();

    if outstanding.is_empty() {
        (ctx.callbacks.relayed_block)(&parsed.header);
    } else {
        ctx.state.current_block = Some(PendingMerkleBlock {
            header: parsed.header,
            outstanding,
        });
    }
    Ok(())
}

pub fn handle_reject(ctx: &mut SyncContext, payload: &[u8]) -> HandlerResult {
    let reject = decode_reject(payload).map_err(ProtocolError::from)?;
    if reject.message == "tx" {
        if let Some(hash) = reject.hash {
            (ctx.callbacks.rejected_tx)(hash, reject.code);
        }
    }
    Ok(())
}

/// Fail an in-progress merkle block because a non-`tx` message arrived
/// before all of its referenced transactions did.
pub fn fail_incomplete_merkle_block(ctx: &mut SyncContext) -> HandlerResult {
    if ctx.state.current_block.take().is_some() {
        warn!(target: "peer", "non-tx message arrived mid-merkleblock, dropping it");
        return Err(ProtocolError::IncompleteMerkleBlock.into());
    }
    Ok(())
}

pub fn log_unknown_command(name: &str) {
    trace!(target: "peer", "ignoring unknown command: {}", name);
}

pub fn log_handled(name: &str) {
    debug!(target: "peer", "handled {}", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NullCollaborator;
    use crate::wire::payload::{encode_inventory, InvType, InventoryItem};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fresh_state() -> SyncState {
        SyncState::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333, 0)
    }

    fn run<'a>(
        state: &'a mut SyncState,
        config: &'a PeerConfig,
        callbacks: &'a Callbacks,
        collab: &'a NullCollaborator,
        out: &'a mut Outbox,
        deadline: &'a Deadline,
        f: impl FnOnce(&mut SyncContext) -> HandlerResult,
    ) -> HandlerResult {
        let mut ctx = SyncContext {
            state,
            config,
            callbacks,
            tx_codec: collab,
            merkle_codec: collab,
            header_validator: collab,
            out,
            deadline,
        };
        f(&mut ctx)
    }

    /// A drip-fed trickle of 3-499 block invs while far behind the
    /// remote's announced height is the tarpit pattern BRPeer.c guards
    /// against; it must disconnect rather than silently accept it.
    #[test]
    fn inv_tarpit_is_rejected() {
        let mut state = fresh_state();
        state.current_block_height = 1;
        state.remote_height = 1_000_000;
        let config = PeerConfig::default();
        let callbacks = Callbacks::default();
        let collab = NullCollaborator;
        let mut out = Outbox::default();
        let deadline = Deadline::disabled();

        let items: Vec<InventoryItem> = (0..10)
            .map(|i| InventoryItem { kind: InvType::Block, hash: Sha256d([i as u8; 32]) })
            .collect();
        let payload = encode_inventory(&items);

        let result = run(&mut state, &config, &callbacks, &collab, &mut out, &deadline, |ctx| {
            handle_inv(ctx, &payload)
        });
        assert!(matches!(result, Err(DisconnectReason::Excess(_))));
    }

    /// A merkle block whose referenced transactions are still missing
    /// stays pending until every one of them arrives as a `tx` message,
    /// at which point `relayed_block` fires exactly once.
    #[test]
    fn merkle_block_completes_after_all_transactions_arrive() {
        let mut state = fresh_state();
        state.sent_filter = true;
        let h1 = Sha256d([1; 32]);
        let h2 = Sha256d([2; 32]);
        let mut outstanding = std::collections::HashSet::new();
        outstanding.insert(h1);
        outstanding.insert(h2);
        state.current_block = Some(PendingMerkleBlock { header: [7; 80], outstanding });

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let mut callbacks = Callbacks::default();
        callbacks.relayed_block = Arc::new(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        struct FirstHashCodec(Sha256d);
        impl TransactionCodec for FirstHashCodec {
            fn parse(&self, _payload: &[u8]) -> Option<Sha256d> {
                Some(self.0)
            }
        }

        let config = PeerConfig::default();
        let collab = NullCollaborator;
        let codec1 = FirstHashCodec(h1);
        let codec2 = FirstHashCodec(h2);
        let mut out = Outbox::default();
        let deadline = Deadline::disabled();

        {
            let mut ctx = SyncContext {
                state: &mut state,
                config: &config,
                callbacks: &callbacks,
                tx_codec: &codec1,
                merkle_codec: &collab,
                header_validator: &collab,
                out: &mut out,
                deadline: &deadline,
            };
            handle_tx(&mut ctx, &[]).unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(state.current_block.is_some());

        {
            let mut ctx = SyncContext {
                state: &mut state,
                config: &config,
                callbacks: &callbacks,
                tx_codec: &codec2,
                merkle_codec: &collab,
                header_validator: &collab,
                out: &mut out,
                deadline: &deadline,
            };
            handle_tx(&mut ctx, &[]).unwrap();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(state.current_block.is_none());
    }

    /// The pong-callback queue length always equals the number of
    /// outstanding pings minus the pongs answered so far: queue two
    /// pings, answer one, and check exactly one callback remains.
    #[test]
    fn pong_queue_matches_outstanding_pings() {
        let mut state = fresh_state();
        let seen = Arc::new(AtomicUsize::new(0));
        let a = seen.clone();
        let b = seen.clone();
        state.pong_callbacks.push_back(Box::new(move |ok| {
            assert!(ok);
            a.fetch_add(1, Ordering::SeqCst);
        }));
        state.pong_callbacks.push_back(Box::new(move |ok| {
            assert!(ok);
            b.fetch_add(1, Ordering::SeqCst);
        }));
        state.nonce = 42;
        assert_eq!(state.pong_callbacks.len(), 2);

        let config = PeerConfig::default();
        let callbacks = Callbacks::default();
        let collab = NullCollaborator;
        let mut out = Outbox::default();
        let deadline = Deadline::disabled();
        let payload = 42u64.to_le_bytes().to_vec();

        run(&mut state, &config, &callbacks, &collab, &mut out, &deadline, |ctx| {
            handle_pong(ctx, &payload)
        })
        .unwrap();

        assert_eq!(state.pong_callbacks.len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
