//! Sensor protocol lib for the fill-level sensor attached to the
//! irrigation controller.
//!
//! The sensor talks over a plain byte transport (UART on the device,
//! a serial device or capture file on the host), so the stack is split
//! in two layers:
//!
//! 1. framing, where a [`FrameSource`] (packetizer) turns the unbounded
//! byte stream into [`CandidateFrame`]s. Noise before a start marker is
//! discarded, partial frames are buffered across deliveries, and frames
//! longer than the configured maximum are dropped.
//!
//! 2. decoding, where a [`ProtoHandler`] validates each candidate frame
//! (CRC, declared length) and hands the payload to a [`SensorReading`]
//! implementation. The handler is generic over the packetizer, so the
//! same decode logic runs behind either framing this crate ships:
//! the length-prefixed [`FillSensorPacketizer`] native to the sensor, or
//! the HDLC style [`DelimitedPacketizer`].
//!
//! The crate is `no_std` unless the `std` feature is enabled, which
//! derives [`std::error::Error`] for [`DecodeError`].
#![cfg_attr(not(feature = "std"), no_std)]

mod checksum;
mod cursor;
#[cfg(any(test, feature = "encoder"))]
pub mod encode;
mod frame;
mod packetizer;
mod proto;

pub use checksum::crc8;
pub use cursor::RawByteCursor;
pub use frame::{CandidateFrame, ExtractorStats, FrameSource, Frames};
pub use packetizer::{DelimitedPacketizer, FillSensorPacketizer};
pub use proto::{
    DecodeStats, FillSensorProtoHandler, FillSensorReading, ProtoHandler, SensorReading,
    StatusFlags,
};

#[cfg(feature = "std")]
use thiserror::Error;

/// Upper bound on any candidate frame, markers and escapes excluded.
/// Runtime limits passed to the packetizers are clamped to this.
pub const MAX_FRAME_CAPACITY: usize = 64;

/// Smallest meaningful frame: the length byte and the CRC byte
pub const FRAME_OVERHEAD: usize = 2;

/// Start marker of the length-prefixed fill sensor framing
pub const FRAME_START: u8 = 0xA5;

/// Flag byte delimiting frames in the HDLC style framing
pub const FRAME_FLAG: u8 = 0x7E;
/// Escape byte in the HDLC style framing
pub const FRAME_ESCAPE: u8 = 0x7D;
/// Escaped bytes are transmitted XOR'd with this
pub const ESCAPE_XOR: u8 = 0x20;

/// Reasons a candidate frame was rejected. None of these are fatal to
/// the stream: the frame is discarded and extraction carries on.
#[cfg_attr(feature = "std", derive(Error))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[cfg_attr(feature = "std", error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}"))]
    IntegrityFailure { expected: u8, actual: u8 },
    #[cfg_attr(feature = "std", error("Length mismatch: expected {expected}, got {actual}"))]
    LengthMismatch { expected: usize, actual: usize },
    #[cfg_attr(feature = "std", error("Field {field} out of range: {value}"))]
    FieldOutOfRange { field: &'static str, value: u32 },
}
