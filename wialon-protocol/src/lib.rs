//! # wialon-protocol
//!
//! Wire protocol implementation for the Wialon IPS device reporting dialect.
//!
//! This crate provides:
//! - Stream framing on CR / CRLF terminators across arbitrary read boundaries
//! - Typed packet parsing (`#L#`, `#SD#`, `#D#`, `#ASD#`)
//! - Custom parameter lists attached to extended data packets
//! - Acknowledgment frames (`#AL#`, `#AA#`, `#AAS#`)

pub mod ack;
pub mod codec;
pub mod error;
pub mod frame;
pub mod packet;

pub use ack::Ack;
pub use codec::{Decoder, Encoder};
pub use error::{ErrorKind, ProtocolError};
pub use frame::RawFrame;
pub use packet::{
    Coordinate, CustomParameter, ExtendedData, Hemisphere, Packet, PacketType, ParamValue,
    ShortData,
};

/// Default TCP port for Wialon IPS gateways.
pub const DEFAULT_PORT: u16 = 20332;

/// Default upper bound for an unterminated frame held in a connection buffer (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;
