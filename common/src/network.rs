//! Bitcoin peer network. Eg. *Mainnet*.
use std::str::FromStr;

use bitcoincash::network::constants::ServiceFlags;
use bitcoincash as bitcoin;

/// Peer services a wallet cares about when selecting a peer to sync from.
#[derive(Debug, Copy, Clone)]
pub enum Services {
    /// Peers that serve full blocks and relay the mempool.
    Chain,
}

impl From<Services> for ServiceFlags {
    fn from(value: Services) -> Self {
        match value {
            Services::Chain => Self::NETWORK,
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Services::Chain
    }
}

/// Bitcoin peer network.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Network {
    /// Bitcoin Mainnet.
    Mainnet,
    /// Bitcoin Testnet.
    Testnet,
    /// Bitcoin regression test net.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Self::Mainnet
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "regtest" => Ok(Self::Regtest),
            _ => Err(format!("invalid network specified {:?}", s)),
        }
    }
}

impl From<Network> for bitcoin::Network {
    fn from(value: Network) -> Self {
        match value {
            Network::Mainnet => Self::Bitcoin,
            Network::Testnet => Self::Testnet,
            Network::Regtest => Self::Regtest,
        }
    }
}

impl Network {
    /// Return the default listen port for the network.
    pub fn port(&self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
            Network::Regtest => 18444,
        }
    }

    /// Return the short string representation of this network.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    /// DNS seeds. Used to bootstrap an address book; the peer core itself
    /// never resolves these (addr relay is accepted, not solicited).
    pub fn seeds(&self) -> &[&str] {
        match self {
            Network::Mainnet => &[
                "seed.flowee.cash",
                "seed-bch.bitcoinforks.org",
                "btccash-seeder.bitcoinunlimited.info",
                "seed.bchd.cash",
                "seed.bch.loping.net",
                "dnsseed.electroncash.de",
                "bchseed.c3-soft.com",
                "bch.bitjson.com",
            ],
            Network::Testnet => &[],
            Network::Regtest => &[],
        }
    }

    /// Get the network magic number for this network, as it appears on the
    /// wire (little-endian) in every frame header. Mainnet is
    /// `0xd9b4bef9`, Testnet is `0x0709110b`.
    pub fn magic(&self) -> u32 {
        bitcoin::Network::from(*self).disk_magic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_matches_wire_constants() {
        assert_eq!(Network::Mainnet.magic(), 0xd9b4bef9);
        assert_eq!(Network::Testnet.magic(), 0x0709110b);
    }

    #[test]
    fn from_str_roundtrip() {
        assert_eq!(Network::from_str("mainnet").unwrap().as_str(), "mainnet");
        assert_eq!(Network::from_str("testnet").unwrap().as_str(), "testnet");
        assert!(Network::from_str("xyz").is_err());
    }
}
