//! Error taxonomy
//!
//! Frame-level failures ([`SecurityError`], [`ProtocolError`]) drop the frame
//! they were raised for. A [`CounterMismatch`] is only a warning: the frame is
//! still applied. [`ActivationError`] leaves the device unjoined until the
//! next attempt.

use thiserror::Error;

/// Integrity or authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// Data frame MIC does not match the network session key
    #[error("invalid MIC")]
    InvalidMic,
    /// Join-accept MIC does not match the application key
    #[error("invalid join-accept MIC")]
    InvalidJoinAcceptMic,
}

/// Structurally malformed frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame does not carry the payload kind the caller expected
    #[error("unexpected payload kind")]
    UnexpectedPayloadKind,
    /// The frame ended before a mandatory field
    #[error("frame truncated: {0}")]
    Truncated(&'static str),
    /// A MAC command could not be decoded
    #[error("invalid MAC command 0x{0:02X}")]
    InvalidMacCommand(u8),
    /// Piggy-backed MAC commands exceed the 15 byte FOpts field
    #[error("FOpts exceed 15 bytes")]
    FOptsTooLong,
    /// Data frames need a joined session
    #[error("device has no session")]
    NoSession,
    /// Frame buffer overflow while assembling a frame
    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),
}

/// Fatal error for a single downlink frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Integrity failure
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// Malformed frame
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Received downlink counter differs from the expected one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid downlink counter: expected {expected}, FHDR {received}")]
pub struct CounterMismatch {
    /// Counter the device expected
    pub expected: u32,
    /// Counter carried by the frame
    pub received: u32,
}

/// OTAA join failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
    /// No join-accept was received
    #[error("join request not accepted")]
    NoAnswer,
    /// The received frame is not a join-accept
    #[error("expected a join-accept frame")]
    NotJoinAccept,
    /// Join-accept failed authentication
    #[error(transparent)]
    Security(#[from] SecurityError),
    /// Join-accept is malformed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration file is not valid TOML for the expected schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// A key or EUI is not valid hex of the expected length
    #[error("invalid hex value {value:?}: expected {expected} bytes")]
    InvalidHex {
        /// Offending input
        value: String,
        /// Expected decoded length
        expected: usize,
    },
}

/// Frame could not be handed to the network side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The receiving side of the transport is gone
    #[error("transport closed")]
    Closed,
}
