//! The framed wire protocol: command names, header/payload framing, and
//! the small binary encodings (locators, inventory items, addr entries)
//! that the outbound builders and sync handlers share.
pub mod command;
pub mod frame;
pub mod payload;

pub use frame::{decode, encode, Frame, FrameError, HEADER_LEN, MAX_MSG_LENGTH};
