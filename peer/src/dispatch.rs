//! Routes a decoded frame to its handler in [`crate::sync`], enforcing
//! the "no non-tx message mid-merkleblock" guard ahead of every handler.
use crate::error::DisconnectReason;
use crate::sync::{self, SyncContext};
use crate::wire::command;

pub fn dispatch(ctx: &mut SyncContext, raw_command: &[u8; 12], payload: &[u8]) -> Result<(), DisconnectReason> {
    if *raw_command != command::TX {
        sync::fail_incomplete_merkle_block(ctx)?;
    }

    match *raw_command {
        command::VERSION => sync::handle_version(ctx, payload),
        command::VERACK => sync::handle_verack(ctx),
        command::ADDR => sync::handle_addr(ctx, payload),
        command::INV => sync::handle_inv(ctx, payload),
        command::TX => sync::handle_tx(ctx, payload),
        command::HEADERS => sync::handle_headers(ctx, payload),
        command::GETADDR => sync::handle_getaddr(ctx),
        command::GETDATA => sync::handle_getdata(ctx, payload),
        command::NOTFOUND => sync::handle_notfound(ctx, payload),
        command::PING => sync::handle_ping(ctx, payload),
        command::PONG => sync::handle_pong(ctx, payload),
        command::MERKLEBLOCK => sync::handle_merkleblock(ctx, payload),
        command::REJECT => sync::handle_reject(ctx, payload),
        // `block`, `getblocks`, `getheaders`, `mempool`, `filterload` sent to
        // us are outside this peer's responsibilities; anything else
        // unrecognized is simply logged.
        other => {
            sync::log_unknown_command(&command::display(&other));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::Callbacks;
    use crate::collab::NullCollaborator;
    use crate::config::PeerConfig;
    use crate::hash::Sha256d;
    use crate::state::{Deadline, PendingMerkleBlock, SyncState};
    use crate::sync::Outbox;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};

    fn fresh_state() -> SyncState {
        SyncState::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333, 0)
    }

    #[test]
    fn non_tx_message_mid_merkleblock_is_fatal() {
        let mut state = fresh_state();
        state.sent_filter = true;
        let mut outstanding = HashSet::new();
        outstanding.insert(Sha256d([1; 32]));
        state.current_block = Some(PendingMerkleBlock { header: [0; 80], outstanding });

        let config = PeerConfig::default();
        let callbacks = Callbacks::default();
        let collab = NullCollaborator;
        let mut out = Outbox::default();
        let deadline = Deadline::disabled();
        let mut ctx = SyncContext {
            state: &mut state,
            config: &config,
            callbacks: &callbacks,
            tx_codec: &collab,
            merkle_codec: &collab,
            header_validator: &collab,
            out: &mut out,
            deadline: &deadline,
        };

        let result = dispatch(&mut ctx, &command::PING, &0u64.to_le_bytes());
        assert!(result.is_err());
        assert!(ctx.state.current_block.is_none());
    }
}
