//! Peer connection configuration.
use std::time::Duration;

use nakamoto_common::network::Network;

/// Our protocol version, sent in the `version` message.
pub const PROTOCOL_VERSION: u32 = 70002;
/// Minimum protocol version accepted from a remote peer.
pub const MIN_PROTOCOL_VERSION: u32 = 70002;
/// Default user agent included in `version` messages.
pub const USER_AGENT: &str = "/nakamoto-peer:0.4.0/";

/// Maximum payload a frame may declare.
pub const MAX_MSG_LENGTH: u32 = 0x0200_0000;
/// Maximum `inv`/`getdata` items accepted in one message.
pub const MAX_INV_ITEMS: usize = 50_000;
/// Maximum `addr` entries accepted in one message.
pub const MAX_ADDR_ITEMS: usize = 1000;
/// Maximum `tx` items accepted in one `inv`.
pub const MAX_TX_ITEMS: usize = 10_000;
/// `headers` batch size that signals "more to come".
pub const MAX_HEADERS_ITEMS: usize = 2000;
/// Slack added on top of the 7-day headers-to-blocks switchover window,
/// matching Bitcoin's future-block-time tolerance.
pub const BLOCK_MAX_TIME_DRIFT: u64 = 2 * 60 * 60;
/// `addr` timestamps are rewritten to this far in the past when the
/// remote reports zero or implausibly future values.
pub const ADDR_GHOST_AGE: u64 = 5 * 24 * 60 * 60;
/// Skew subtracted from every `addr` timestamp, matching peers that
/// report their own local time rather than when they last saw an
/// address.
pub const ADDR_TIME_SKEW: u64 = 2 * 60 * 60;
/// Bit in the services bitfield indicating a full network node, required
/// of any address relayed onward.
pub const SERVICES_NODE_NETWORK: u64 = 1 << 0;

/// Configuration for one peer connection.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Network this peer is speaking (selects the magic number).
    pub network: Network,
    /// Protocol version advertised in our `version` message.
    pub protocol_version: u32,
    /// Minimum protocol version accepted from the remote.
    pub min_protocol_version: u32,
    /// User agent advertised in our `version` message.
    pub user_agent: String,
    /// Wallet creation time; controls the headers-to-blocks switchover.
    pub earliest_key_time: u64,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Socket read/send timeout; also the receive loop's wake interval.
    pub socket_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            protocol_version: PROTOCOL_VERSION,
            min_protocol_version: MIN_PROTOCOL_VERSION,
            user_agent: USER_AGENT.to_string(),
            earliest_key_time: 0,
            connect_timeout: Duration::from_secs(3),
            socket_timeout: Duration::from_secs(1),
        }
    }
}

impl PeerConfig {
    /// Construct a configuration for `network`, keeping every other field
    /// at its default.
    pub fn new(network: Network) -> Self {
        Self { network, ..Self::default() }
    }
}
