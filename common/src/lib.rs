//! Types shared between the SPV peer core and whatever embeds it.
pub mod network;

pub use bitcoincash;
pub use bitcoin_hashes;
